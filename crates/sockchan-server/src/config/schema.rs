use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use sockchan_core::error::{ChannelError, Result};
use sockchan_core::protocol::DEFAULT_MAX_FRAME_BYTES;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: 1,
            server: ServerSection::default(),
        }
    }
}

impl ServerConfig {
    /// Default config listening on `listen` (use port 0 for an ephemeral port).
    pub fn new(listen: impl Into<String>) -> Self {
        let mut cfg = Self::default();
        cfg.server.listen = listen.into();
        cfg
    }

    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.server.processing_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(ChannelError::Config(format!(
                "unsupported config version: {}",
                self.version
            )));
        }

        self.server.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Artificial delay before each request is handled.
    #[serde(default)]
    pub processing_delay_ms: u64,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            processing_delay_ms: 0,
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if self.processing_delay_ms > 60_000 {
            return Err(ChannelError::Config(
                "server.processing_delay_ms must be at most 60000".into(),
            ));
        }
        if !(64..=64 * 1024 * 1024).contains(&self.max_frame_bytes) {
            return Err(ChannelError::Config(
                "server.max_frame_bytes must be between 64 and 67108864".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            ChannelError::Config(format!("server.listen must be a valid socket address: {e}"))
        })
    }

    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}
fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}
