//! In-memory transport and a scriptable fake server for channel tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::broadcast;

use sockchan_client::{BoxStream, ChannelConfig, ChannelEvent, ChannelState, Connector};
use sockchan_core::protocol::{FrameReader, FrameWriter, Request, Response, DEFAULT_MAX_FRAME_BYTES};

/// Config with short delays so fault tests stay fast.
pub fn fast_config() -> ChannelConfig {
    ChannelConfig::default()
        .with_retry_delay(Duration::from_millis(10))
        .with_connect_timeout(Duration::from_secs(2))
        .with_dispose_grace(Duration::from_secs(2))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PeerScript {
    /// Client writes that fail (across all connections) before writes succeed.
    pub failing_writes: usize,
    /// Every connect attempt is refused.
    pub refuse: bool,
    /// The first connection starts with an undecodable frame.
    pub garbage_on_first: bool,
    /// Requests are recorded but never answered.
    pub silent: bool,
    /// Every connect attempt takes this long before it succeeds or is refused.
    pub connect_delay: Option<Duration>,
    /// Client writes never complete.
    pub stall_writes: bool,
}

/// Connector backed by `tokio::io::duplex`, with an echoing fake peer.
pub struct MemoryConnector {
    script: PeerScript,
    failing_writes: Arc<AtomicUsize>,
    connects: AtomicUsize,
    received: Arc<Mutex<Vec<Request>>>,
}

impl MemoryConnector {
    pub fn new(script: PeerScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            failing_writes: Arc::new(AtomicUsize::new(script.failing_writes)),
            connects: AtomicUsize::new(0),
            received: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Requests the peer decoded, in arrival order.
    pub fn received(&self) -> Vec<Request> {
        self.received.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> io::Result<BoxStream> {
        if let Some(delay) = self.script.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.script.refuse {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused by test peer"));
        }
        let n = self.connects.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(256 * 1024);
        tokio::spawn(run_peer(
            server,
            self.received.clone(),
            self.script.garbage_on_first && n == 0,
            self.script.silent,
        ));
        Ok(Box::new(FlakyStream {
            inner: client,
            failing_writes: self.failing_writes.clone(),
            stall_writes: self.script.stall_writes,
        }))
    }

    fn target(&self) -> String {
        "memory".into()
    }
}

async fn run_peer(stream: DuplexStream, received: Arc<Mutex<Vec<Request>>>, garbage: bool, silent: bool) {
    let (read, mut write) = tokio::io::split(stream);
    if garbage && write.write_all(&[3, 0, 0, 0, b'{', b'{', b'{']).await.is_err() {
        return;
    }
    let mut reader = FrameReader::new(read, DEFAULT_MAX_FRAME_BYTES);
    let mut writer = FrameWriter::new(write, DEFAULT_MAX_FRAME_BYTES);

    while let Ok(Some(req)) = reader.read_frame::<Request>().await {
        received.lock().unwrap().push(req.clone());
        if silent {
            continue;
        }
        let resp = Response::ok(&req, req.data.clone());
        if writer.write_frame(&resp).await.is_err() {
            return;
        }
    }
}

/// Client-side stream whose first N writes fail without writing anything.
struct FlakyStream {
    inner: DuplexStream,
    failing_writes: Arc<AtomicUsize>,
    stall_writes: bool,
}

impl AsyncRead for FlakyStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FlakyStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.stall_writes {
            return Poll::Pending;
        }
        let fail = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected write failure")));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Wait until `want` shows up on the event stream, skipping anything else.
pub async fn wait_for_state(events: &mut broadcast::Receiver<ChannelEvent>, want: ChannelState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(ChannelEvent::StateChanged(s)) if s == want => return,
                Ok(_) => continue,
                Err(e) => panic!("event stream failed while waiting for {want}: {e}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {want}"));
}

/// Collect the state transitions currently buffered on the event stream.
pub fn drain_states(events: &mut broadcast::Receiver<ChannelEvent>) -> Vec<ChannelState> {
    let mut out = Vec::new();
    while let Ok(ev) = events.try_recv() {
        if let ChannelEvent::StateChanged(s) = ev {
            out.push(s);
        }
    }
    out
}
