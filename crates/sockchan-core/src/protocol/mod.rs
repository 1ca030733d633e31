//! Wire protocol: envelopes, framing, and async frame I/O.
//!
//! Both directions share one format: a 4-byte little-endian length prefix
//! followed by a JSON envelope. All parsers are panic-free: malformed input
//! is reported as `ChannelError::Protocol` and the connection is dropped.

pub mod envelope;
pub mod frame;
pub mod io;

pub use envelope::{to_payload, Envelope, Request, RequestId, Response};
pub use frame::{decode_frame, encode_frame, DEFAULT_MAX_FRAME_BYTES, LENGTH_PREFIX_SIZE};
pub use io::{FrameReader, FrameWriter};
