use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use super::context::ToolContext;
use super::envelope::ToolCallRequest;
use super::registry::{RegisteredTool, ToolRegistry};
use crate::cache::cache_key;
use crate::context::ServerContext;
use crate::error::{kinds, ServeError};
use crate::metrics::Outcome;
use crate::rate_limit::Admission;
use crate::streams::{StreamHandle, StreamWriter};

/// A validated-later tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub client_id: String,
    pub operation: String,
    pub params: Value,
    pub stream: bool,
    pub bypass_cache: bool,
}

impl ToolCall {
    pub fn new(client_id: impl Into<String>, operation: impl Into<String>, params: Value) -> Self {
        Self {
            client_id: client_id.into(),
            operation: operation.into(),
            params,
            stream: false,
            bypass_cache: false,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn bypassing_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

impl From<ToolCallRequest> for ToolCall {
    fn from(request: ToolCallRequest) -> Self {
        Self {
            client_id: request.client_id,
            operation: request.operation,
            params: request.params.unwrap_or(Value::Null),
            stream: request.stream,
            bypass_cache: request.bypass_cache,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Completed { result: Value, cached: bool },
    Streaming { handle: StreamHandle },
}

/// Entry point for every tool call.
pub struct Dispatcher {
    server: Arc<ServerContext>,
    tools: ToolRegistry,
}

impl Dispatcher {
    pub fn new(server: Arc<ServerContext>, tools: ToolRegistry) -> Self {
        Self { server, tools }
    }

    pub fn server(&self) -> &Arc<ServerContext> {
        &self.server
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Routes a call through admission control, the cache and the handler.
    ///
    /// Invalid and rate-limited calls are rejected before the handler or the
    /// cache is touched. Streaming calls return a handle immediately while
    /// the handler runs on its own task.
    pub async fn dispatch(&self, call: ToolCall) -> Result<DispatchOutcome, ServeError> {
        let started = Instant::now();
        let server = &self.server;

        let (tool, params) = match self.validate(&call) {
            Ok(validated) => validated,
            Err(e) => {
                server.monitor.record_error(e.kind());
                return Err(e);
            }
        };

        server.sessions.touch(&call.client_id);
        if let Admission::Denied { retry_after } =
            server.limiter.admit(&call.client_id, server.clock.now())
        {
            debug!(
                "Rate limited {} calling {}, retry after {:?}",
                call.client_id, call.operation, retry_after
            );
            server
                .monitor
                .record(&call.operation, started.elapsed(), Outcome::RateLimited);
            return Err(ServeError::RateLimited { retry_after });
        }

        if call.stream {
            let handle = self.start_stream(tool, &call.client_id, params);
            return Ok(DispatchOutcome::Streaming { handle });
        }

        let mut key = (tool.is_cacheable() && !call.bypass_cache)
            .then(|| cache_key(&tool.name, &params));
        if let Some(k) = &key {
            match server.cache.get(k) {
                Ok(Some(result)) => {
                    server
                        .monitor
                        .record(&call.operation, started.elapsed(), Outcome::CacheHit);
                    return Ok(DispatchOutcome::Completed {
                        result,
                        cached: true,
                    });
                }
                Ok(None) => server.monitor.record_cache_miss(),
                Err(e) => {
                    warn!("Bypassing cache for {}: {}", call.operation, e);
                    server.monitor.record_error(e.kind());
                    key = None;
                }
            }
        }

        let ctx = ToolContext {
            client_id: call.client_id.clone(),
            server: server.clone(),
            stream: None,
        };
        match (tool.handler)(ctx, params).await {
            Ok(result) => {
                if let Some(k) = &key {
                    if let Err(e) = server.cache.put(k, result.clone(), tool.cache_ttl()) {
                        warn!("Could not cache result of {}: {}", call.operation, e);
                    }
                }
                server
                    .monitor
                    .record(&call.operation, started.elapsed(), Outcome::Success);
                Ok(DispatchOutcome::Completed {
                    result,
                    cached: false,
                })
            }
            Err(e) => {
                let error = ServeError::HandlerError(format!("{:#}", e));
                debug!("{} failed: {}", call.operation, error);
                server.monitor.record(
                    &call.operation,
                    started.elapsed(),
                    Outcome::Error(kinds::HANDLER_ERROR),
                );
                Err(error)
            }
        }
    }

    fn validate(&self, call: &ToolCall) -> Result<(&RegisteredTool, Value), ServeError> {
        if call.operation.trim().is_empty() {
            return Err(ServeError::invalid("missing operation name"));
        }
        if call.client_id.trim().is_empty() {
            return Err(ServeError::invalid("missing client_id"));
        }
        let tool = self
            .tools
            .get(&call.operation)
            .ok_or_else(|| ServeError::invalid(format!("unknown operation: {}", call.operation)))?;

        let params = match &call.params {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        tool.check_params(&params)?;
        Ok((tool, params))
    }

    /// Creates the stream and runs the handler on its own task.
    ///
    /// The handler may push chunks through its context. When it returns, a
    /// non-null result is appended (arrays element by element) and the stream
    /// is closed; an error fails the stream instead.
    fn start_stream(&self, tool: &RegisteredTool, client_id: &str, params: Value) -> StreamHandle {
        let server = self.server.clone();
        let handle = server.streams.create();
        let writer = StreamWriter::new(handle.clone(), server.streams.clone(), server.hub.clone());
        let ctx = ToolContext {
            client_id: client_id.to_string(),
            server: server.clone(),
            stream: Some(writer.clone()),
        };
        let operation = tool.name.clone();
        let produce = (tool.handler)(ctx, params);

        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match produce.await {
                Ok(result) => {
                    push_result(&writer, result);
                    if let Err(e) = writer.close() {
                        debug!("Could not close stream {}: {}", writer.handle(), e);
                    }
                    Outcome::Success
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    debug!("Streaming {} failed: {}", operation, message);
                    if let Err(e) = writer.fail(&message) {
                        debug!("Could not fail stream {}: {}", writer.handle(), e);
                    }
                    Outcome::Error(kinds::HANDLER_ERROR)
                }
            };
            server.monitor.record(&operation, started.elapsed(), outcome);
        });

        handle
    }
}

fn push_result(writer: &StreamWriter, result: Value) {
    let items = match result {
        Value::Null => return,
        Value::Array(items) => items,
        other => vec![other],
    };
    for item in items {
        if let Err(e) = writer.push(item) {
            debug!("Stopped writing to {}: {}", writer.handle(), e);
            return;
        }
    }
}
