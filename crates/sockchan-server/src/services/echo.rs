use async_trait::async_trait;
use serde_json::value::RawValue;

use sockchan_core::error::Result;
use sockchan_core::protocol::Request;

use crate::dispatch::{RequestHandler, RequestKind};

/// Returns the request payload byte-for-byte.
pub struct EchoHandler;

#[async_trait]
impl RequestHandler for EchoHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::Echo
    }

    async fn handle(&self, req: &Request) -> Result<Option<Box<RawValue>>> {
        Ok(req.data.clone())
    }
}
