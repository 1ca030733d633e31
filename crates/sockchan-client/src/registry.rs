//! Correlation registry: request id -> pending completion handle.
//!
//! The registry is the only writer of "resolved" state. Every entry is
//! resolved exactly once: by a response, a send failure, or cancellation on
//! dispose. Resolving removes the entry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::oneshot;

use sockchan_core::error::{ChannelError, Result};
use sockchan_core::protocol::{RequestId, Response};

/// Completion half handed to the caller.
pub(crate) type Completion = oneshot::Receiver<Result<Response>>;

struct PendingEntry {
    tx: oneshot::Sender<Result<Response>>,
    sequence: u64,
    created_at: Instant,
}

pub struct CorrelationRegistry {
    pending: DashMap<RequestId, PendingEntry>,
    seq: AtomicU64,
    discarded: AtomicU64,
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            seq: AtomicU64::new(1),
            discarded: AtomicU64::new(0),
        }
    }

    /// Next sequence number. Starts at 1, never reused.
    pub fn next_sequence(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register(&self, id: RequestId, sequence: u64) -> Completion {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingEntry {
                tx,
                sequence,
                created_at: Instant::now(),
            },
        );
        rx
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }

    /// Resolve with a response from the server (success or application
    /// failure alike). Returns false when the response was discarded.
    pub fn complete(&self, resp: Response) -> bool {
        let id = resp.id;
        let Some((_, entry)) = self.pending.remove(&id) else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%id, seq = resp.sequence, "discarding response with no pending request");
            return false;
        };

        tracing::debug!(
            %id,
            seq = entry.sequence,
            success = resp.success,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            "request resolved"
        );
        if entry.tx.send(Ok(resp)).is_err() {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%id, "caller no longer waiting, response discarded");
            return false;
        }
        true
    }

    /// Resolve with a failure.
    pub fn fail(&self, id: &RequestId, err: ChannelError) -> bool {
        match self.pending.remove(id) {
            Some((_, entry)) => {
                let _ = entry.tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Resolve everything still pending as `Cancelled`.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<RequestId> = self.pending.iter().map(|e| *e.key()).collect();
        ids.iter()
            .filter(|id| self.fail(id, ChannelError::Cancelled))
            .count()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Responses that arrived after their request was already resolved or
    /// abandoned by the caller.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use sockchan_core::protocol::Request;

    #[test]
    fn sequences_start_at_one_and_increase() {
        let reg = CorrelationRegistry::new();
        assert_eq!(reg.next_sequence(), 1);
        assert_eq!(reg.next_sequence(), 2);
        assert_eq!(reg.next_sequence(), 3);
    }

    #[tokio::test]
    async fn complete_resolves_and_removes() {
        let reg = CorrelationRegistry::new();
        let req = Request::new("ECHO", None, reg.next_sequence());
        let rx = reg.register(req.id, req.sequence);

        assert!(reg.complete(Response::ok(&req, None)));
        assert!(reg.is_empty());
        let resp = rx.await.unwrap().unwrap();
        assert_eq!(resp.id, req.id);
    }

    #[tokio::test]
    async fn second_resolution_is_discarded() {
        let reg = CorrelationRegistry::new();
        let req = Request::new("ECHO", None, reg.next_sequence());
        let rx = reg.register(req.id, req.sequence);

        assert!(reg.fail(&req.id, ChannelError::Cancelled));
        assert!(!reg.complete(Response::ok(&req, None)));
        assert_eq!(reg.discarded(), 1);
        assert_eq!(rx.await.unwrap().unwrap_err().code().as_str(), "CANCELLED");
    }

    #[tokio::test]
    async fn response_for_dropped_caller_counts_as_discarded() {
        let reg = CorrelationRegistry::new();
        let req = Request::new("PING", None, reg.next_sequence());
        drop(reg.register(req.id, req.sequence));

        assert!(!reg.complete(Response::ok(&req, None)));
        assert!(reg.is_empty());
        assert_eq!(reg.discarded(), 1);
    }

    #[test]
    fn cancel_all_drains_everything() {
        let reg = CorrelationRegistry::new();
        let rxs: Vec<_> = (0..4)
            .map(|_| {
                let req = Request::new("PING", None, reg.next_sequence());
                reg.register(req.id, req.sequence)
            })
            .collect();
        assert_eq!(reg.cancel_all(), 4);
        assert!(reg.is_empty());
        drop(rxs);
    }
}
