//! Transport seam: how the channel opens a byte stream.
//!
//! `TcpConnector` is the production implementation. Tests plug in in-memory
//! or fault-injecting streams through the same trait.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Any bidirectional byte stream a channel can run over.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> ByteStream for T {}

pub type BoxStream = Box<dyn ByteStream>;

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new stream. The caller applies the connect timeout.
    async fn connect(&self) -> std::io::Result<BoxStream>;

    /// Human-readable target, for logs and errors.
    fn target(&self) -> String;
}

pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> std::io::Result<BoxStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn target(&self) -> String {
        self.addr.clone()
    }
}
