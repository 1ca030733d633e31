//! Top-level facade crate for sockchan.
//!
//! Re-exports the wire protocol, the multiplexed client channel and the
//! request server so users can depend on a single crate.

pub mod core {
    pub use sockchan_core::*;
}

pub mod client {
    pub use sockchan_client::*;
}

pub mod server {
    pub use sockchan_server::*;
}

pub use sockchan_client::{Channel, ChannelConfig, ChannelEvent, ChannelState};
pub use sockchan_core::{ChannelError, Result};
