//! Async frame I/O over any tokio byte stream.
//!
//! - Zero bytes at a frame boundary: clean EOF (`Ok(None)`).
//! - Stream ends mid-frame, or any read/write failure: `Transport`.
//! - Bad length or undecodable body: `Protocol` (the connection is unusable).

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ChannelError, Result};
use crate::protocol::envelope::Envelope;
use crate::protocol::frame::{check_len, decode_body, encode_frame, LENGTH_PREFIX_SIZE};

/// Reads envelopes from the read side of a connection.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            max_frame_bytes,
        }
    }

    /// Read one frame. `Ok(None)` means the peer closed cleanly.
    pub async fn read_frame<E: Envelope>(&mut self) -> Result<Option<E>> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        let n = self.inner.read(&mut prefix).await?;
        if n == 0 {
            return Ok(None);
        }
        if n < LENGTH_PREFIX_SIZE {
            self.inner
                .read_exact(&mut prefix[n..])
                .await
                .map_err(mid_frame)?;
        }

        let len = check_len(u32::from_le_bytes(prefix) as usize, self.max_frame_bytes)?;
        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).await.map_err(mid_frame)?;

        decode_body(&body).map(Some)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes envelopes to the write side of a connection.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    max_frame_bytes: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            max_frame_bytes,
        }
    }

    /// Encode and write one frame, then flush.
    ///
    /// Encoding failures surface as `Protocol` before any byte is written.
    pub async fn write_frame<E: Envelope>(&mut self, env: &E) -> Result<()> {
        let frame = encode_frame(env, self.max_frame_bytes)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Best-effort shutdown of the write direction.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

fn mid_frame(e: std::io::Error) -> ChannelError {
    if e.kind() == ErrorKind::UnexpectedEof {
        ChannelError::Transport("connection closed mid-frame".into())
    } else {
        ChannelError::Transport(e.to_string())
    }
}
