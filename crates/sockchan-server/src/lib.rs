//! sockchan server library entry.
//!
//! Wires the TCP transport, the kind-keyed dispatcher and the built-in
//! request handlers into one server. Consumed by the binary (`main.rs`) and
//! by integration tests, which bind on an ephemeral port.

pub mod app_state;
pub mod config;
pub mod dispatch;
pub mod obs;
pub mod services;
pub mod transport;

pub use transport::Server;
