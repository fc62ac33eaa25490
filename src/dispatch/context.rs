//! Tool Execution Context
//!
//! Provides access to server state for tool implementations.

use std::sync::Arc;

use crate::context::ServerContext;
use crate::streams::StreamWriter;

/// Context provided to tool handlers during execution
#[derive(Clone)]
pub struct ToolContext {
    /// The calling client
    pub client_id: String,

    /// Shared serving components (telemetry, hub, ...)
    pub server: Arc<ServerContext>,

    /// Present when the call was dispatched in streaming mode
    pub stream: Option<StreamWriter>,
}

impl ToolContext {
    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }
}
