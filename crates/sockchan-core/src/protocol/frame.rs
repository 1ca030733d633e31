//! Length-prefixed framing (panic-free).
//!
//! Frame layout: `[len: u32 little-endian][len bytes of UTF-8 JSON]`.
//! The prefix counts only the JSON bytes. A zero length or a length above the
//! configured limit is a protocol error.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ChannelError, Result};
use crate::protocol::envelope::Envelope;

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound for a frame body (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Validate a declared frame length.
pub fn check_len(len: usize, max_frame_bytes: usize) -> Result<usize> {
    if len == 0 {
        return Err(ChannelError::Protocol("empty frame".into()));
    }
    if len > max_frame_bytes {
        return Err(ChannelError::Protocol(format!(
            "frame length {len} exceeds limit {max_frame_bytes}"
        )));
    }
    Ok(len)
}

/// Encode an envelope into a complete frame.
pub fn encode_frame<E: Envelope>(env: &E, max_frame_bytes: usize) -> Result<Bytes> {
    let body = serde_json::to_vec(env)
        .map_err(|e| ChannelError::Protocol(format!("encode failed: {e}")))?;
    check_len(body.len(), max_frame_bytes)?;

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32_le(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Decode a frame body (the bytes after the prefix).
pub fn decode_body<E: Envelope>(body: &[u8]) -> Result<E> {
    let text = std::str::from_utf8(body)
        .map_err(|e| ChannelError::Protocol(format!("frame is not utf-8: {e}")))?;
    let env: E = serde_json::from_str(text)
        .map_err(|e| ChannelError::Protocol(format!("invalid envelope json: {e}")))?;
    env.validate()?;
    Ok(env)
}

/// Decode one complete in-memory frame. Trailing bytes are rejected.
pub fn decode_frame<E: Envelope>(mut buf: Bytes, max_frame_bytes: usize) -> Result<E> {
    if buf.remaining() < LENGTH_PREFIX_SIZE {
        return Err(ChannelError::Protocol("frame too short".into()));
    }
    let len = check_len(buf.get_u32_le() as usize, max_frame_bytes)?;
    if buf.remaining() != len {
        return Err(ChannelError::Protocol(format!(
            "declared length {len} but {} bytes follow",
            buf.remaining()
        )));
    }
    decode_body(&buf)
}
