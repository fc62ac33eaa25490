//! Error taxonomy shared by every component of the serving core.
//!
//! Each variant maps to a stable `kind` string that clients can branch on
//! without parsing messages.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServeError {
    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// The external operation failed. The message is passed through verbatim.
    #[error("{0}")]
    HandlerError(String),

    #[error("Stream gone: {0}")]
    StreamGone(String),

    #[error("Read timed out")]
    Timeout,

    #[error("Connection gone")]
    ConnectionGone,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub mod kinds {
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const CACHE_UNAVAILABLE: &str = "cache_unavailable";
    pub const HANDLER_ERROR: &str = "handler_error";
    pub const STREAM_GONE: &str = "stream_gone";
    pub const TIMEOUT: &str = "timeout";
    pub const CONNECTION_GONE: &str = "connection_gone";
    pub const INVALID_REQUEST: &str = "invalid_request";
}

impl ServeError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServeError::RateLimited { .. } => kinds::RATE_LIMITED,
            ServeError::CacheUnavailable(_) => kinds::CACHE_UNAVAILABLE,
            ServeError::HandlerError(_) => kinds::HANDLER_ERROR,
            ServeError::StreamGone(_) => kinds::STREAM_GONE,
            ServeError::Timeout => kinds::TIMEOUT,
            ServeError::ConnectionGone => kinds::CONNECTION_GONE,
            ServeError::InvalidRequest(_) => kinds::INVALID_REQUEST,
        }
    }

    /// Only populated for `RateLimited`.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ServeError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ServeError::InvalidRequest(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(
            ServeError::RateLimited {
                retry_after: Duration::from_secs(1)
            }
            .kind(),
            "rate_limited"
        );
        assert_eq!(ServeError::CacheUnavailable("".into()).kind(), "cache_unavailable");
        assert_eq!(ServeError::HandlerError("".into()).kind(), "handler_error");
        assert_eq!(ServeError::StreamGone("".into()).kind(), "stream_gone");
        assert_eq!(ServeError::Timeout.kind(), "timeout");
        assert_eq!(ServeError::ConnectionGone.kind(), "connection_gone");
        assert_eq!(ServeError::invalid("x").kind(), "invalid_request");
    }

    #[test]
    fn test_retry_after_only_for_rate_limited() {
        let limited = ServeError::RateLimited {
            retry_after: Duration::from_millis(1500),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_millis(1500)));
        assert_eq!(ServeError::Timeout.retry_after(), None);
    }

    #[test]
    fn test_handler_error_message_is_verbatim() {
        let err = ServeError::HandlerError("parser exploded: line 3".to_string());
        assert_eq!(err.to_string(), "parser exploded: line 3");
    }
}
