//! Connection manager: the single owner of channel state transitions.
//!
//! Both loops and the facade go through `connect` / `reconnect`. A gate
//! serializes attempts: the first caller performs the attempt, callers that
//! queued behind it get the same outcome instead of opening a second socket.
//!
//! Sockets are split on install. The halves sit in a slot until the sender
//! loop (write half) and receiver loop (read half) take them; each loop then
//! owns its half exclusively, so no lock is held around I/O.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};

use sockchan_core::error::{ChannelError, Result};
use sockchan_core::protocol::{FrameReader, FrameWriter};

use crate::config::ChannelConfig;
use crate::connector::{BoxStream, Connector};
use crate::state::{ChannelEvent, ChannelState, Snapshot};

pub(crate) type LinkReader = FrameReader<ReadHalf<BoxStream>>;
pub(crate) type LinkWriter = FrameWriter<WriteHalf<BoxStream>>;

const EVENT_CAPACITY: usize = 256;

#[derive(Default)]
struct LinkSlot {
    generation: u64,
    reader: Option<LinkReader>,
    writer: Option<LinkWriter>,
}

impl LinkSlot {
    fn clear(&mut self) {
        self.reader = None;
        self.writer = None;
    }
}

/// Outcome of the most recent connect attempt, shared with queued callers.
struct AttemptLog {
    completed: u64,
    last: Result<()>,
}

pub(crate) struct ConnectionManager {
    connector: Arc<dyn Connector>,
    cfg: ChannelConfig,
    status: watch::Sender<Snapshot>,
    events: broadcast::Sender<ChannelEvent>,
    gate: AsyncMutex<AttemptLog>,
    attempts: AtomicU64,
    link: Mutex<LinkSlot>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, cfg: ChannelConfig) -> Self {
        let (status, _) = watch::channel(Snapshot {
            state: ChannelState::Disconnected,
            generation: 0,
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connector,
            cfg,
            status,
            events,
            gate: AsyncMutex::new(AttemptLog {
                completed: 0,
                last: Ok(()),
            }),
            attempts: AtomicU64::new(0),
            link: Mutex::new(LinkSlot::default()),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.status.borrow()
    }

    pub fn state(&self) -> ChannelState {
        self.snapshot().state
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.status.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    pub fn emit_error(&self, err: &ChannelError) {
        let _ = self.events.send(ChannelEvent::Error(err.to_string()));
    }

    /// Connect if not connected. Fails with `Connection` on timeout or refusal.
    pub async fn connect(&self) -> Result<()> {
        let seen = self.attempts.load(Ordering::Acquire);
        let mut log = self.gate.lock().await;

        match self.state() {
            ChannelState::Disposed => return Err(ChannelError::Disposed),
            ChannelState::Connected => return Ok(()),
            _ => {}
        }
        if log.completed != seen {
            return log.last.clone();
        }

        self.set_state(ChannelState::Connecting);
        let res = self.establish().await;
        self.finish(&mut log, res)
    }

    /// Reconnect-with-delay after the link of `failed_generation` was lost.
    ///
    /// Returns immediately when another caller already restored the link.
    pub async fn reconnect(&self, failed_generation: u64) -> Result<()> {
        let seen = self.attempts.load(Ordering::Acquire);
        let mut log = self.gate.lock().await;

        let snap = self.snapshot();
        match snap.state {
            ChannelState::Disposed => return Err(ChannelError::Disposed),
            ChannelState::Connected => {
                tracing::debug!(
                    failed_generation,
                    generation = snap.generation,
                    "link already restored"
                );
                return Ok(());
            }
            _ => {}
        }
        if log.completed != seen {
            return log.last.clone();
        }

        self.set_state(ChannelState::Reconnecting);
        if !self.pause(self.cfg.retry_delay()).await {
            return Err(ChannelError::Disposed);
        }
        let res = self.establish().await;
        self.finish(&mut log, res)
    }

    /// Mark the link of `generation` as gone. Only the first report for a
    /// generation transitions state; later ones are ignored.
    pub fn mark_lost(&self, generation: u64, reason: &ChannelError) -> bool {
        let lost = self.status.send_if_modified(|s| {
            if s.state == ChannelState::Connected && s.generation == generation {
                s.state = ChannelState::Disconnected;
                true
            } else {
                false
            }
        });
        if lost {
            {
                let mut slot = self.slot();
                if slot.generation == generation {
                    slot.clear();
                }
            }
            tracing::warn!(generation, error = %reason, "connection lost");
            let _ = self
                .events
                .send(ChannelEvent::StateChanged(ChannelState::Disconnected));
            self.emit_error(reason);
        }
        lost
    }

    pub fn take_reader(&self) -> Option<(u64, LinkReader)> {
        let snap = self.snapshot();
        if snap.state != ChannelState::Connected {
            return None;
        }
        let mut slot = self.slot();
        if slot.generation != snap.generation {
            return None;
        }
        let generation = slot.generation;
        slot.reader.take().map(|r| (generation, r))
    }

    pub fn take_writer(&self) -> Option<(u64, LinkWriter)> {
        let snap = self.snapshot();
        if snap.state != ChannelState::Connected {
            return None;
        }
        let mut slot = self.slot();
        if slot.generation != snap.generation {
            return None;
        }
        let generation = slot.generation;
        slot.writer.take().map(|w| (generation, w))
    }

    /// Enter the terminal state. Returns false if already disposed.
    pub fn dispose(&self) -> bool {
        let changed = self.status.send_if_modified(|s| {
            if s.state == ChannelState::Disposed {
                false
            } else {
                s.state = ChannelState::Disposed;
                true
            }
        });
        if changed {
            self.slot().clear();
            tracing::info!(peer = %self.connector.target(), "channel disposed");
            let _ = self
                .events
                .send(ChannelEvent::StateChanged(ChannelState::Disposed));
        }
        changed
    }

    /// Sleep unless the channel is disposed first. Returns false on dispose.
    pub async fn pause(&self, delay: Duration) -> bool {
        let mut stop = self.subscribe();
        tokio::select! {
            _ = wait_disposed(&mut stop) => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn establish(&self) -> Result<()> {
        let target = self.connector.target();
        let timeout = self.cfg.connect_timeout();
        let mut stop = self.subscribe();

        let stream = tokio::select! {
            _ = wait_disposed(&mut stop) => return Err(ChannelError::Disposed),
            res = tokio::time::timeout(timeout, self.connector.connect()) => match res {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return Err(ChannelError::Connection(format!("connect to {target} failed: {e}")));
                }
                Err(_) => {
                    return Err(ChannelError::Connection(format!(
                        "connect to {target} timed out after {}ms",
                        timeout.as_millis()
                    )));
                }
            },
        };

        self.install(stream)
    }

    fn install(&self, stream: BoxStream) -> Result<()> {
        let (read, write) = tokio::io::split(stream);
        let generation = {
            let mut slot = self.slot();
            slot.generation += 1;
            slot.reader = Some(FrameReader::new(read, self.cfg.max_frame_bytes));
            slot.writer = Some(FrameWriter::new(write, self.cfg.max_frame_bytes));
            slot.generation
        };

        let installed = self.status.send_if_modified(|s| {
            if s.state == ChannelState::Disposed {
                return false;
            }
            s.state = ChannelState::Connected;
            s.generation = generation;
            true
        });
        if !installed {
            self.slot().clear();
            return Err(ChannelError::Disposed);
        }

        tracing::info!(peer = %self.connector.target(), generation, "connected");
        let _ = self
            .events
            .send(ChannelEvent::StateChanged(ChannelState::Connected));
        Ok(())
    }

    fn finish(&self, log: &mut AttemptLog, res: Result<()>) -> Result<()> {
        if let Err(e) = &res {
            if !matches!(e, ChannelError::Disposed) {
                tracing::warn!(error = %e, "connect attempt failed");
                self.set_state(ChannelState::Disconnected);
                self.emit_error(e);
            }
        }
        log.completed += 1;
        log.last = res.clone();
        self.attempts.store(log.completed, Ordering::Release);
        res
    }

    fn set_state(&self, to: ChannelState) -> bool {
        let changed = self.status.send_if_modified(|s| {
            if s.state == ChannelState::Disposed || s.state == to {
                false
            } else {
                s.state = to;
                true
            }
        });
        if changed {
            tracing::debug!(state = %to, "channel state changed");
            let _ = self.events.send(ChannelEvent::StateChanged(to));
        }
        changed
    }

    fn slot(&self) -> MutexGuard<'_, LinkSlot> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves once the channel is disposed (or the manager is gone).
pub(crate) async fn wait_disposed(rx: &mut watch::Receiver<Snapshot>) {
    loop {
        let disposed = rx.borrow_and_update().state == ChannelState::Disposed;
        if disposed || rx.changed().await.is_err() {
            return;
        }
    }
}
