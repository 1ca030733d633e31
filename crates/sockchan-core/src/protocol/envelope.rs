//! Request / Response envelopes (JSON).
//!
//! Payloads are stored as `RawValue` so the server parses them lazily and
//! `echo` can hand the exact bytes back.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::error::{ChannelError, Result};

/// Correlation id. Stable for the life of a logical request, retries included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Anything that travels inside a frame.
pub trait Envelope: Serialize + DeserializeOwned {
    /// Structural checks beyond what serde enforces.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Client -> server envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub id: RequestId,
    /// Request type tag (field name is `type` in JSON).
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Optional payload, stored as raw JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
    /// Creation time, unix millis.
    #[serde(default)]
    pub timestamp: u64,
    #[serde(rename = "sequenceNumber")]
    pub sequence: u64,
    #[serde(rename = "retryCount", default)]
    pub retry_count: u32,
}

impl Request {
    pub fn new(msg_type: impl Into<String>, data: Option<Box<RawValue>>, sequence: u64) -> Self {
        Self {
            id: RequestId::new(),
            msg_type: msg_type.into(),
            data,
            timestamp: unix_millis(),
            sequence,
            retry_count: 0,
        }
    }

    /// Parse the payload into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = self
            .data
            .as_ref()
            .ok_or_else(|| ChannelError::Application("missing data".into()))?;
        serde_json::from_str(raw.get())
            .map_err(|e| ChannelError::Application(format!("invalid data: {e}")))
    }
}

impl Envelope for Request {
    fn validate(&self) -> Result<()> {
        if self.sequence == 0 {
            return Err(ChannelError::Protocol("sequenceNumber must be positive".into()));
        }
        Ok(())
    }
}

/// Server -> client envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Response {
    /// Echo of the request id, the sole correlation key.
    #[serde(rename = "messageId")]
    pub id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
    #[serde(rename = "sequenceNumber")]
    pub sequence: u64,
}

impl Response {
    pub fn ok(req: &Request, result: Option<Box<RawValue>>) -> Self {
        Self {
            id: req.id,
            success: true,
            error: None,
            result,
            sequence: req.sequence,
        }
    }

    pub fn failed(req: &Request, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = "unknown error".into();
        }
        Self {
            id: req.id,
            success: false,
            error: Some(error),
            result: None,
            sequence: req.sequence,
        }
    }

    /// Raw result JSON, if any.
    pub fn result_raw(&self) -> Option<&str> {
        self.result.as_ref().map(|r| r.get())
    }

    /// Decode the result. A failed response maps to `ChannelError::Application`.
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T> {
        if !self.success {
            return Err(ChannelError::Application(
                self.error.clone().unwrap_or_default(),
            ));
        }
        let raw = self.result_raw().unwrap_or("null");
        serde_json::from_str(raw)
            .map_err(|e| ChannelError::Application(format!("invalid result: {e}")))
    }
}

impl Envelope for Response {
    fn validate(&self) -> Result<()> {
        match (self.success, &self.error, &self.result) {
            (true, Some(_), _) => Err(ChannelError::Protocol(
                "successful response carries an error".into(),
            )),
            (false, None, _) => Err(ChannelError::Protocol(
                "failed response without error".into(),
            )),
            (false, _, Some(_)) => Err(ChannelError::Protocol(
                "failed response carries a result".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Serialize any value into a raw JSON payload.
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<Box<RawValue>> {
    serde_json::value::to_raw_value(value)
        .map_err(|e| ChannelError::Application(format!("unserializable payload: {e}")))
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn request_field_names_are_stable() {
        let req = Request::new("ECHO", Some(to_payload("hi").unwrap()), 7);
        let v: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert_eq!(v["type"], "ECHO");
        assert_eq!(v["data"], "hi");
        assert_eq!(v["sequenceNumber"], 7);
        assert_eq!(v["retryCount"], 0);
        assert!(v["id"].is_string());
    }

    #[test]
    fn failed_response_never_has_empty_error() {
        let req = Request::new("X", None, 1);
        let resp = Response::failed(&req, "");
        assert_eq!(resp.error.as_deref(), Some("unknown error"));
        assert!(resp.validate().is_ok());
    }

    #[test]
    fn result_as_surfaces_application_error() {
        let req = Request::new("ERROR", None, 1);
        let resp = Response::failed(&req, "boom");
        let err = resp.result_as::<String>().unwrap_err();
        assert_eq!(err.code().as_str(), "APPLICATION");
        assert_eq!(err.to_string(), "boom");
    }
}
