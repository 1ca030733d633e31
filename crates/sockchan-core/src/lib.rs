//! sockchan core: envelopes, framing codec, and the shared error taxonomy.
//!
//! This crate defines the wire-level contract used by both the multiplexed
//! client channel and the request server. It only depends on tokio's I/O
//! traits, so any byte stream (TCP, in-memory duplex) can carry frames.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here.
//! All fallible paths surface as `ChannelError`/`Result` so a malformed frame
//! from the network can never crash the process.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ChannelError, ErrorCode, Result};
