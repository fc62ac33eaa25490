//! Tool dispatch: the registry of operations and the call pipeline that
//! runs admission control, caching and telemetry around each handler.

mod context;
mod dispatcher;
mod envelope;
mod registry;

pub use context::ToolContext;
pub use dispatcher::{DispatchOutcome, Dispatcher, ToolCall};
pub use envelope::{ErrorBody, ToolCallRequest, ToolResponse};
pub use registry::{
    CachePolicy, RegisteredTool, ToolBuilder, ToolDefinition, ToolFuture, ToolHandler,
    ToolRegistry,
};
