//! Dispatcher module exports.
//!
//! Re-exports the dispatcher and handler trait so services and transport can
//! depend on this module directly.

pub mod dispatcher;

pub use dispatcher::{Dispatcher, RequestHandler, RequestKind};
