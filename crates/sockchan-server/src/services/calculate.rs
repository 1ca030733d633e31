//! Arithmetic on two numbers: `{"operation": "ADD", "a": 5, "b": 3}`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::value::RawValue;

use sockchan_core::error::{ChannelError, Result};
use sockchan_core::protocol::{to_payload, Request};

use crate::dispatch::{RequestHandler, RequestKind};

#[derive(Debug, Deserialize)]
pub struct Calculation {
    pub operation: String,
    pub a: f64,
    pub b: f64,
}

pub struct CalculateHandler;

/// Evaluate one operation. Operation names are case-insensitive.
pub fn evaluate(operation: &str, a: f64, b: f64) -> std::result::Result<f64, String> {
    let value = match operation.to_ascii_uppercase().as_str() {
        "ADD" => a + b,
        "SUBTRACT" => a - b,
        "MULTIPLY" => a * b,
        "DIVIDE" => {
            if b == 0.0 {
                return Err("division by zero".into());
            }
            a / b
        }
        other => return Err(format!("unknown operation {other}")),
    };
    if !value.is_finite() {
        return Err("result is not a finite number".into());
    }
    Ok(value)
}

fn calc_error(detail: impl std::fmt::Display) -> ChannelError {
    ChannelError::Application(format!("Calculation error: {detail}"))
}

#[async_trait]
impl RequestHandler for CalculateHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::Calculate
    }

    async fn handle(&self, req: &Request) -> Result<Option<Box<RawValue>>> {
        let calc: Calculation = req.data_as().map_err(calc_error)?;
        let value = evaluate(&calc.operation, calc.a, calc.b).map_err(calc_error)?;
        to_payload(&value).map(Some)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn four_operations() {
        assert_eq!(evaluate("ADD", 5.0, 3.0), Ok(8.0));
        assert_eq!(evaluate("subtract", 5.0, 3.0), Ok(2.0));
        assert_eq!(evaluate("Multiply", 5.0, 3.0), Ok(15.0));
        assert_eq!(evaluate("DIVIDE", 6.0, 3.0), Ok(2.0));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(evaluate("DIVIDE", 1.0, 0.0), Err("division by zero".to_string()));
        assert!(evaluate("MODULO", 1.0, 2.0).unwrap_err().contains("MODULO"));
        assert!(evaluate("MULTIPLY", f64::MAX, 2.0).is_err());
    }

    #[tokio::test]
    async fn handler_reports_calculation_errors() {
        let data = to_payload(&serde_json::json!({"operation": "DIVIDE", "a": 1, "b": 0})).unwrap();
        let req = Request::new("CALCULATE", Some(data), 1);
        let err = CalculateHandler.handle(&req).await.unwrap_err();
        assert_eq!(err.to_string(), "Calculation error: division by zero");

        let req = Request::new("CALCULATE", None, 2);
        let err = CalculateHandler.handle(&req).await.unwrap_err();
        assert!(err.to_string().starts_with("Calculation error: "));
    }

    #[tokio::test]
    async fn handler_returns_a_number() {
        let data = to_payload(&serde_json::json!({"operation": "add", "a": 5, "b": 3})).unwrap();
        let req = Request::new("CALCULATE", Some(data), 1);
        let raw = CalculateHandler.handle(&req).await.unwrap().unwrap();
        let v: f64 = serde_json::from_str(raw.get()).unwrap();
        assert_eq!(v, 8.0);
    }
}
