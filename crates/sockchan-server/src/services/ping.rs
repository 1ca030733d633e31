use async_trait::async_trait;
use serde_json::value::RawValue;

use sockchan_core::error::Result;
use sockchan_core::protocol::{to_payload, Request};

use crate::dispatch::{RequestHandler, RequestKind};

/// Liveness probe: always answers `"PONG"`.
pub struct PingHandler;

#[async_trait]
impl RequestHandler for PingHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::Ping
    }

    async fn handle(&self, _req: &Request) -> Result<Option<Box<RawValue>>> {
        to_payload("PONG").map(Some)
    }
}
