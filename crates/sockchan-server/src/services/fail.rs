use async_trait::async_trait;
use serde_json::value::RawValue;

use sockchan_core::error::{ChannelError, Result};
use sockchan_core::protocol::Request;

use crate::dispatch::{RequestHandler, RequestKind};

/// Always fails. Lets clients exercise the application-error path.
pub struct FailHandler;

#[async_trait]
impl RequestHandler for FailHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::Error
    }

    async fn handle(&self, _req: &Request) -> Result<Option<Box<RawValue>>> {
        Err(ChannelError::Application("Simulated error for testing".into()))
    }
}
