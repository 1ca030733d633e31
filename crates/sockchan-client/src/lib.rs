//! sockchan client: many concurrent callers, one TCP connection.
//!
//! - `send` assigns a process-wide sequence number, queues the envelope and
//!   waits for the response with the same id.
//! - One sender loop writes frames strictly in sequence order and retries a
//!   failed write across reconnects, up to the retry budget.
//! - One receiver loop reads responses and resolves the matching caller.
//! - All state transitions go through a single connection manager, so
//!   concurrent connect attempts collapse into one.
//!
//! Delivery is at-least-once: a retried request may be executed twice by the
//! server.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod channel;
pub mod config;
pub mod connector;
pub mod registry;
pub mod state;

mod connection;
mod receiver;
mod sender;

pub use channel::Channel;
pub use config::ChannelConfig;
pub use connector::{BoxStream, ByteStream, Connector, TcpConnector};
pub use state::{ChannelEvent, ChannelState};
