//! Sender loop: the single consumer of the outbound queue.
//!
//! Frames go on the wire in sequence order. Concurrent `send` calls may reach
//! the queue slightly out of order, so arrivals are parked in a small reorder
//! buffer and released strictly by `next_seq`. Every assigned sequence is
//! enqueued (no fallible step or await sits between the two), so the buffer
//! never waits on a gap.
//!
//! A stuck head blocks everything behind it: the envelope is retried (with
//! reconnect-with-delay) until it is written or its retry budget runs out.
//! Every retry waits at least the retry delay after the failed attempt, even
//! when another caller has already restored the link.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use sockchan_core::error::ChannelError;
use sockchan_core::protocol::Request;

use crate::connection::{wait_disposed, ConnectionManager, LinkWriter};
use crate::registry::CorrelationRegistry;
use crate::state::{ChannelState, Snapshot};

pub(crate) struct SenderLoop {
    mgr: Arc<ConnectionManager>,
    registry: Arc<CorrelationRegistry>,
    queued: Arc<AtomicUsize>,
    max_retries: u32,
    retry_delay: Duration,
    stop: watch::Receiver<Snapshot>,
    link: Option<(u64, LinkWriter)>,
}

impl SenderLoop {
    pub fn new(
        mgr: Arc<ConnectionManager>,
        registry: Arc<CorrelationRegistry>,
        queued: Arc<AtomicUsize>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        let stop = mgr.subscribe();
        Self {
            mgr,
            registry,
            queued,
            max_retries,
            retry_delay,
            stop,
            link: None,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Request>) {
        let mut next_seq: u64 = 1;
        let mut parked: BTreeMap<u64, Request> = BTreeMap::new();

        'outer: loop {
            let req = tokio::select! {
                biased;
                _ = wait_disposed(&mut self.stop) => break,
                msg = rx.recv() => match msg {
                    Some(req) => req,
                    None => break,
                },
            };
            parked.insert(req.sequence, req);

            while let Some(req) = parked.remove(&next_seq) {
                next_seq += 1;
                self.queued.fetch_sub(1, Ordering::AcqRel);
                if !self.deliver(req).await {
                    break 'outer;
                }
            }
        }

        tracing::debug!(parked = parked.len(), "sender loop stopped");
    }

    /// Write one envelope, retrying across reconnects. Returns false once the
    /// channel is disposed.
    async fn deliver(&mut self, mut req: Request) -> bool {
        let mut retries: u32 = 0;

        loop {
            req.retry_count = retries;

            let (failed_generation, err) = match self.writer() {
                Some((generation, mut writer)) => {
                    let res = tokio::select! {
                        biased;
                        _ = wait_disposed(&mut self.stop) => return false,
                        res = writer.write_frame(&req) => res,
                    };
                    match res {
                        Ok(()) => {
                            self.link = Some((generation, writer));
                            tracing::debug!(
                                id = %req.id,
                                seq = req.sequence,
                                retry = retries,
                                "request written"
                            );
                            return true;
                        }
                        Err(e @ ChannelError::Protocol(_)) => {
                            // Nothing reached the wire; the link is still usable.
                            self.link = Some((generation, writer));
                            tracing::warn!(id = %req.id, seq = req.sequence, error = %e, "request not encodable");
                            self.registry.fail(&req.id, e);
                            return true;
                        }
                        Err(e) => {
                            self.mgr.mark_lost(generation, &e);
                            (generation, e)
                        }
                    }
                }
                None => {
                    let snap = self.mgr.snapshot();
                    if snap.state == ChannelState::Disposed {
                        return false;
                    }
                    (
                        snap.generation,
                        ChannelError::Transport("not connected".into()),
                    )
                }
            };

            retries += 1;
            if retries > self.max_retries {
                tracing::warn!(
                    id = %req.id,
                    seq = req.sequence,
                    retries = self.max_retries,
                    error = %err,
                    "retry budget exhausted"
                );
                self.registry.fail(
                    &req.id,
                    ChannelError::RetryExhausted {
                        retries: self.max_retries,
                        last_error: err.to_string(),
                    },
                );
                return true;
            }

            tracing::debug!(id = %req.id, seq = req.sequence, retry = retries, error = %err, "retrying request");
            let failed_at = Instant::now();
            match self.mgr.reconnect(failed_generation).await {
                Ok(()) => {}
                Err(ChannelError::Disposed) => return false,
                Err(e) => tracing::debug!(error = %e, "reconnect failed"),
            }
            let waited = failed_at.elapsed();
            if waited < self.retry_delay && !self.mgr.pause(self.retry_delay - waited).await {
                return false;
            }
        }
    }

    /// Current write half: the one already held if its link is still live,
    /// otherwise a fresh one from the manager.
    fn writer(&mut self) -> Option<(u64, LinkWriter)> {
        let snap = self.mgr.snapshot();
        self.link
            .take()
            .filter(|(generation, _)| {
                snap.state == ChannelState::Connected && snap.generation == *generation
            })
            .or_else(|| self.mgr.take_writer())
    }
}
