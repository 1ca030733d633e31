//! Shared application state for the server.
//!
//! Validates config, builds the handler table and owns the metrics.
//! Cloned into every connection task.

use std::sync::Arc;

use sockchan_core::error::Result;

use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, RequestKind};
use crate::obs::ServerMetrics;
use crate::services::{CalculateHandler, ClockHandler, EchoHandler, FailHandler, PingHandler};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<ServerMetrics>,
}

struct AppStateInner {
    cfg: ServerConfig,
}

impl AppState {
    /// Returns Result so main can report a bad config instead of panicking.
    pub fn new(cfg: ServerConfig) -> Result<Self> {
        cfg.validate()?;

        let dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(PingHandler));
        dispatcher.register(Arc::new(EchoHandler));
        dispatcher.register(Arc::new(ClockHandler));
        dispatcher.register(Arc::new(CalculateHandler));
        dispatcher.register(Arc::new(FailHandler));

        let registered = dispatcher.registered_kinds();
        for kind in RequestKind::ALL {
            if !registered.contains(&kind) {
                tracing::warn!(%kind, "no handler registered, requests will be answered as unknown");
            }
        }

        Ok(Self {
            inner: Arc::new(AppStateInner { cfg }),
            dispatcher: Arc::new(dispatcher),
            metrics: Arc::new(ServerMetrics::default()),
        })
    }

    pub fn cfg(&self) -> &ServerConfig {
        &self.inner.cfg
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }
}
