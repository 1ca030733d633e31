//! Transport layer (raw TCP, length-prefixed frames).
//!
//! `listener` accepts sockets and spawns one task per client; `connection`
//! runs the read -> dispatch -> write loop for a single client.

pub mod connection;
pub mod listener;

pub use connection::serve_connection;
pub use listener::Server;
