//! Lightweight in-process metrics (dependency-free).
//!
//! Counters, gauges and histograms are stored as atomics and rendered in the
//! Prometheus text format; the binary logs a snapshot on shutdown.

pub mod metrics;

pub use metrics::ServerMetrics;
