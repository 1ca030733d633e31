use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::value::RawValue;

use sockchan_core::error::Result;
use sockchan_core::protocol::{to_payload, Request};

use crate::dispatch::{RequestHandler, RequestKind};

/// Current server time, `YYYY-MM-DD HH:MM:SS UTC`.
pub struct ClockHandler;

pub fn format_time(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

#[async_trait]
impl RequestHandler for ClockHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::Time
    }

    async fn handle(&self, _req: &Request) -> Result<Option<Box<RawValue>>> {
        to_payload(&format_time(Utc::now())).map(Some)
    }
}
