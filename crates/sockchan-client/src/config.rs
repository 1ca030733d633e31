//! Channel configuration (strict parsing).
//!
//! All knobs are plain scalars; nothing is reconfigured at runtime.

use std::fs;
use std::time::Duration;

use serde::Deserialize;
use sockchan_core::error::{ChannelError, Result};
use sockchan_core::protocol::DEFAULT_MAX_FRAME_BYTES;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Resend attempts per envelope after the first write fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause before each reconnect attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound on how long `dispose()` waits for the loops to stop.
    #[serde(default = "default_dispose_grace_ms")]
    pub dispose_grace_ms: u64,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            dispose_grace_ms: default_dispose_grace_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl ChannelConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_dispose_grace(mut self, grace: Duration) -> Self {
        self.dispose_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn dispose_grace(&self) -> Duration {
        Duration::from_millis(self.dispose_grace_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ChannelError::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ChannelError::Config("port must not be 0".into()));
        }
        if !(1..=300_000).contains(&self.connect_timeout_ms) {
            return Err(ChannelError::Config(
                "connect_timeout_ms must be between 1 and 300000".into(),
            ));
        }
        if self.retry_delay_ms > 600_000 {
            return Err(ChannelError::Config(
                "retry_delay_ms must be at most 600000".into(),
            ));
        }
        if self.dispose_grace_ms == 0 {
            return Err(ChannelError::Config("dispose_grace_ms must be positive".into()));
        }
        if !(64..=64 * 1024 * 1024).contains(&self.max_frame_bytes) {
            return Err(ChannelError::Config(
                "max_frame_bytes must be between 64 and 67108864".into(),
            ));
        }
        Ok(())
    }
}

pub fn load_from_file(path: &str) -> Result<ChannelConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| ChannelError::Config(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ChannelConfig> {
    let cfg: ChannelConfig = serde_yaml::from_str(s)
        .map_err(|e| ChannelError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8080
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_dispose_grace_ms() -> u64 {
    5000
}
fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let cfg = load_from_str("{}").unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:8080");
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.retry_delay(), Duration::from_secs(1));
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = load_from_str("host: localhost\nmax_retry: 3\n").unwrap_err();
        assert_eq!(err.code().as_str(), "CONFIG");
    }

    #[test]
    fn zero_connect_timeout_is_invalid() {
        let err = ChannelConfig::default()
            .with_connect_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("connect_timeout_ms"));
    }
}
