use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::value::RawValue;

use sockchan_core::error::Result;
use sockchan_core::protocol::{Request, Response};

/// Request kinds the server understands. Tags match case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Ping,
    Echo,
    Time,
    Calculate,
    Error,
}

impl RequestKind {
    pub const ALL: [RequestKind; 5] = [
        RequestKind::Ping,
        RequestKind::Echo,
        RequestKind::Time,
        RequestKind::Calculate,
        RequestKind::Error,
    ];

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(tag.trim()))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Ping => "PING",
            RequestKind::Echo => "ECHO",
            RequestKind::Time => "TIME",
            RequestKind::Calculate => "CALCULATE",
            RequestKind::Error => "ERROR",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One handler per request kind.
///
/// `Ok` becomes a successful response carrying the returned result; `Err`
/// becomes a failed response carrying the error message. Handlers never
/// affect the connection itself.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    fn kind(&self) -> RequestKind;
    async fn handle(&self, req: &Request) -> Result<Option<Box<RawValue>>>;
}

/// Kind-keyed handler table.
#[derive(Default)]
pub struct Dispatcher {
    handlers: DashMap<RequestKind, Arc<dyn RequestHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    pub fn register(&self, handler: Arc<dyn RequestHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn registered_kinds(&self) -> Vec<RequestKind> {
        self.handlers.iter().map(|e| *e.key()).collect()
    }

    /// Always produces a response; failures are reported in-band.
    pub async fn dispatch(&self, req: &Request) -> Response {
        let Some(kind) = RequestKind::parse(&req.msg_type) else {
            return Response::failed(req, format!("Unknown message type: {}", req.msg_type));
        };
        let Some(handler) = self.handlers.get(&kind).map(|e| e.value().clone()) else {
            return Response::failed(req, format!("Unknown message type: {}", req.msg_type));
        };

        match handler.handle(req).await {
            Ok(result) => Response::ok(req, result),
            Err(e) => {
                tracing::debug!(id = %req.id, %kind, error = %e, "handler failed");
                Response::failed(req, e.to_string())
            }
        }
    }
}
