//! Mapping of the transport-agnostic envelopes onto HTTP responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::dispatch::{DispatchOutcome, ToolResponse};
use crate::error::ServeError;
use crate::streams::ReadOutcome;

/// A tool response plus the HTTP status it is served with.
pub struct ApiResponse(pub Result<Value, ServeError>);

/// `result` of a dispatched call; streaming calls expose their handle.
pub fn dispatch_result(outcome: DispatchOutcome) -> Value {
    match outcome {
        DispatchOutcome::Completed { result, .. } => result,
        DispatchOutcome::Streaming { handle } => json!({ "stream": handle.as_str() }),
    }
}

/// `result` of a stream read: `{seq, data}` or `{end_of_stream: true}`.
pub fn read_result(outcome: ReadOutcome) -> Value {
    match outcome {
        ReadOutcome::Chunk(chunk) => json!({ "seq": chunk.seq, "data": chunk.data }),
        ReadOutcome::EndOfStream => json!({ "end_of_stream": true }),
    }
}

impl From<DispatchOutcome> for ApiResponse {
    fn from(outcome: DispatchOutcome) -> Self {
        ApiResponse(Ok(dispatch_result(outcome)))
    }
}

impl From<ReadOutcome> for ApiResponse {
    fn from(outcome: ReadOutcome) -> Self {
        ApiResponse(Ok(read_result(outcome)))
    }
}

impl From<ServeError> for ApiResponse {
    fn from(error: ServeError) -> Self {
        ApiResponse(Err(error))
    }
}

pub fn status_for(error: &ServeError) -> StatusCode {
    match error {
        ServeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ServeError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ServeError::HandlerError(_) => StatusCode::BAD_GATEWAY,
        ServeError::StreamGone(_) => StatusCode::GONE,
        ServeError::Timeout => StatusCode::REQUEST_TIMEOUT,
        ServeError::CacheUnavailable(_) | ServeError::ConnectionGone => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let error = match self.0 {
            Ok(result) => return Json(ToolResponse::success(result)).into_response(),
            Err(error) => error,
        };

        let mut response = (status_for(&error), Json(ToolResponse::failure(&error))).into_response();
        if let Some(retry_after) = error.retry_after() {
            // Retry-After only takes whole seconds; never advertise 0.
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
