//! Receiver loop: reads response frames and resolves registry entries.
//!
//! Follows the connection state rather than polling it. A read is only
//! abandoned once its link is gone, so a frame is never cut in half on a
//! live socket.

use std::sync::Arc;

use tokio::sync::watch;

use sockchan_core::error::{ChannelError, Result};
use sockchan_core::protocol::Response;

use crate::connection::{ConnectionManager, LinkReader};
use crate::registry::CorrelationRegistry;
use crate::state::{ChannelState, Snapshot};

pub(crate) struct ReceiverLoop {
    mgr: Arc<ConnectionManager>,
    registry: Arc<CorrelationRegistry>,
    status: watch::Receiver<Snapshot>,
}

impl ReceiverLoop {
    pub fn new(mgr: Arc<ConnectionManager>, registry: Arc<CorrelationRegistry>) -> Self {
        let status = mgr.subscribe();
        Self {
            mgr,
            registry,
            status,
        }
    }

    pub async fn run(mut self) {
        loop {
            let snap = *self.status.borrow_and_update();
            match snap.state {
                ChannelState::Disposed => break,
                ChannelState::Connected => match self.mgr.take_reader() {
                    Some((generation, reader)) => self.drain(generation, reader).await,
                    None => {
                        if self.status.changed().await.is_err() {
                            break;
                        }
                    }
                },
                ChannelState::Disconnected => {
                    if let Err(ChannelError::Disposed) = self.mgr.reconnect(snap.generation).await {
                        break;
                    }
                }
                ChannelState::Connecting | ChannelState::Reconnecting => {
                    if self.status.changed().await.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("receiver loop stopped");
    }

    async fn drain(&mut self, generation: u64, mut reader: LinkReader) {
        loop {
            let Some(res) = next_frame(&mut self.status, generation, &mut reader).await else {
                return;
            };
            match res {
                Ok(Some(resp)) => {
                    self.registry.complete(resp);
                }
                Ok(None) => {
                    let err = ChannelError::Transport("peer closed the connection".into());
                    self.mgr.mark_lost(generation, &err);
                    return;
                }
                Err(e) => {
                    tracing::warn!(generation, error = %e, "read failed");
                    self.mgr.mark_lost(generation, &e);
                    return;
                }
            }
        }
    }
}

/// Read one frame, or `None` once the link of `generation` is no longer live.
async fn next_frame(
    status: &mut watch::Receiver<Snapshot>,
    generation: u64,
    reader: &mut LinkReader,
) -> Option<Result<Option<Response>>> {
    let read = reader.read_frame::<Response>();
    tokio::pin!(read);

    loop {
        tokio::select! {
            res = &mut read => return Some(res),
            changed = status.changed() => {
                if changed.is_err() {
                    return None;
                }
                let snap = *status.borrow_and_update();
                if snap.state != ChannelState::Connected || snap.generation != generation {
                    return None;
                }
            }
        }
    }
}
