//! Public channel facade.
//!
//! A `Channel` is cheap to clone; clones share one socket, one registry and
//! one pair of background loops. Loops are spawned by the first successful
//! connect and live until the channel is disposed.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::value::RawValue;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use sockchan_core::error::{ChannelError, Result};
use sockchan_core::protocol::{to_payload, Request, Response};

use crate::config::ChannelConfig;
use crate::connection::ConnectionManager;
use crate::connector::{Connector, TcpConnector};
use crate::receiver::ReceiverLoop;
use crate::registry::{Completion, CorrelationRegistry};
use crate::sender::SenderLoop;
use crate::state::{ChannelEvent, ChannelState};

#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: ChannelConfig,
    mgr: Arc<ConnectionManager>,
    registry: Arc<CorrelationRegistry>,
    queue: mpsc::UnboundedSender<Request>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Request>>>,
    queued: Arc<AtomicUsize>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    loops_started: AtomicBool,
}

impl Channel {
    /// Channel over TCP to `cfg.host:cfg.port`. Does not connect yet.
    pub fn new(cfg: ChannelConfig) -> Result<Self> {
        let connector = Arc::new(TcpConnector::new(cfg.addr()));
        Self::with_connector(cfg, connector)
    }

    /// Channel over a custom transport.
    pub fn with_connector(cfg: ChannelConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        cfg.validate()?;
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let mgr = Arc::new(ConnectionManager::new(connector, cfg.clone()));

        Ok(Self {
            inner: Arc::new(Inner {
                cfg,
                mgr,
                registry: Arc::new(CorrelationRegistry::new()),
                queue,
                queue_rx: Mutex::new(Some(queue_rx)),
                queued: Arc::new(AtomicUsize::new(0)),
                tasks: Mutex::new(Vec::new()),
                loops_started: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.cfg
    }

    /// Establish the connection. A no-op when already connected; concurrent
    /// callers share a single attempt.
    pub async fn connect(&self) -> Result<()> {
        self.inner.mgr.connect().await?;
        self.start_loops();
        Ok(())
    }

    /// Send a typed payload and wait for its response.
    ///
    /// A payload serializing to `null` is sent without data. Application
    /// failures come back as `Ok` with `success == false`.
    pub async fn send<T: Serialize + ?Sized>(&self, msg_type: &str, payload: &T) -> Result<Response> {
        self.send_raw(msg_type, payload_of(payload)?).await
    }

    pub async fn send_raw(
        &self,
        msg_type: impl Into<String>,
        data: Option<Box<RawValue>>,
    ) -> Result<Response> {
        self.send_with_cancel(msg_type, data, std::future::pending()).await
    }

    /// Like `send_raw`, but resolves as `Cancelled` once `cancel` completes.
    ///
    /// Cancellation only revokes interest: a queued or written frame is not
    /// retracted, and a late response is discarded.
    pub async fn send_with_cancel<F>(
        &self,
        msg_type: impl Into<String>,
        data: Option<Box<RawValue>>,
        cancel: F,
    ) -> Result<Response>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        if self.needs_connect()? {
            // Detached: dropping this call must not abort a shared attempt.
            let this = self.clone();
            let attempt = tokio::spawn(async move { this.connect().await });
            tokio::select! {
                biased;
                res = attempt => res.unwrap_or_else(|e| {
                    Err(ChannelError::Transport(format!("connect task failed: {e}")))
                })?,
                _ = &mut cancel => {
                    tracing::debug!("send cancelled by caller while connecting");
                    return Err(ChannelError::Cancelled);
                }
            }
        }
        let completion = self.enqueue(msg_type.into(), data);

        tokio::select! {
            biased;
            res = completion => res.unwrap_or_else(|_| Err(ChannelError::Cancelled)),
            _ = &mut cancel => {
                tracing::debug!("send cancelled by caller");
                Err(ChannelError::Cancelled)
            }
        }
    }

    /// Stop both loops, close the socket and resolve every pending call as
    /// `Cancelled`. Bounded by `dispose_grace`.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        if !inner.mgr.dispose() {
            return;
        }
        let cancelled = inner.registry.cancel_all();

        let mut handles = std::mem::take(&mut *lock(&inner.tasks));
        let grace = inner.cfg.dispose_grace();
        if tokio::time::timeout(grace, join_all(handles.iter_mut())).await.is_err() {
            tracing::warn!(grace_ms = grace.as_millis() as u64, "loops did not stop in time, aborting");
            for handle in &handles {
                handle.abort();
            }
        }

        inner.queued.store(0, Ordering::Release);
        tracing::info!(cancelled, "channel shut down");
    }

    pub fn state(&self) -> ChannelState {
        self.inner.mgr.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// State changes and recovered faults, from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.mgr.events()
    }

    /// Envelopes accepted but not yet handed to the socket.
    pub fn queued_len(&self) -> usize {
        self.inner.queued.load(Ordering::Acquire)
    }

    /// Calls still waiting for a resolution.
    pub fn pending_len(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn discarded_responses(&self) -> u64 {
        self.inner.registry.discarded()
    }

    /// Whether `send` has to connect before queueing.
    fn needs_connect(&self) -> Result<bool> {
        match self.state() {
            ChannelState::Disposed => Err(ChannelError::Disposed),
            ChannelState::Disconnected => Ok(true),
            _ if !self.inner.loops_started.load(Ordering::Acquire) => Ok(true),
            // Connecting / Reconnecting: the loops pick the envelope up once
            // the link is back.
            _ => Ok(false),
        }
    }

    /// Assign a sequence, register and queue. No await in here: sequence
    /// order and queue order must not be separable by a suspended caller.
    fn enqueue(&self, msg_type: String, data: Option<Box<RawValue>>) -> Completion {
        let inner = &self.inner;
        let req = Request::new(msg_type, data, inner.registry.next_sequence());
        let (id, sequence) = (req.id, req.sequence);
        let completion = inner.registry.register(id, sequence);

        inner.queued.fetch_add(1, Ordering::AcqRel);
        if inner.queue.send(req).is_err() {
            inner.queued.fetch_sub(1, Ordering::AcqRel);
            inner.registry.fail(&id, ChannelError::Disposed);
        } else {
            tracing::trace!(%id, seq = sequence, "request queued");
        }

        // dispose() may have drained the registry just before we registered.
        if inner.mgr.state() == ChannelState::Disposed {
            inner.registry.fail(&id, ChannelError::Cancelled);
        }
        completion
    }

    fn start_loops(&self) {
        let inner = &self.inner;
        if inner.loops_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(rx) = lock(&inner.queue_rx).take() else {
            return;
        };

        let sender = SenderLoop::new(
            inner.mgr.clone(),
            inner.registry.clone(),
            inner.queued.clone(),
            inner.cfg.max_retries,
            inner.cfg.retry_delay(),
        );
        let receiver = ReceiverLoop::new(inner.mgr.clone(), inner.registry.clone());

        let mut tasks = lock(&inner.tasks);
        tasks.push(tokio::spawn(sender.run(rx)));
        tasks.push(tokio::spawn(receiver.run()));
        tracing::debug!(peer = %inner.cfg.addr(), "channel loops started");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.mgr.dispose();
        self.registry.cancel_all();
    }
}

fn payload_of<T: Serialize + ?Sized>(payload: &T) -> Result<Option<Box<RawValue>>> {
    let raw = to_payload(payload)?;
    Ok((raw.get() != "null").then_some(raw))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
