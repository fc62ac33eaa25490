//! Transport-agnostic tool-call request and response shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServeError;

/// `{ "operation", "params", "stream", "client_id", "bypass_cache" }`
///
/// Every field is optional at the serde level so that a malformed envelope
/// surfaces as `InvalidRequest` instead of a transport-level rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolCallRequest {
    pub operation: String,
    pub params: Option<Value>,
    pub stream: bool,
    pub client_id: String,
    pub bypass_cache: bool,
}

impl ToolCallRequest {
    pub fn from_value(value: Value) -> Result<Self, ServeError> {
        serde_json::from_value(value)
            .map_err(|e| ServeError::invalid(format!("malformed tool call: {}", e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    /// Seconds; only present for `rate_limited`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
}

impl From<&ServeError> for ErrorBody {
    fn from(error: &ServeError) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
            retry_after: error.retry_after().map(|d| d.as_secs_f64()),
        }
    }
}

/// `{ "ok", "result", "error" }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResponse {
    pub ok: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ToolResponse {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result,
            error: None,
        }
    }

    pub fn failure(error: &ServeError) -> Self {
        Self {
            ok: false,
            result: Value::Null,
            error: Some(error.into()),
        }
    }
}
