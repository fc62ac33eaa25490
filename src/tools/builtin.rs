//! Built-in tools served without a backend.

use anyhow::Result;
use serde_json::Value;

use crate::dispatch::{RegisteredTool, ToolBuilder, ToolContext, ToolRegistry};

/// Register built-in tools with the registry
pub fn register_tools(registry: &mut ToolRegistry) -> Result<()> {
    registry.register(echo_tool())?;
    registry.register(server_stats_tool())?;
    Ok(())
}

// ============================================================================
// echo
// ============================================================================

fn echo_tool() -> RegisteredTool {
    ToolBuilder::new("echo")
        .description("Return the given parameters unchanged")
        .input_schema(serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": true
        }))
        .cacheable(None)
        .build(echo_handler)
}

async fn echo_handler(_ctx: ToolContext, params: Value) -> Result<Value> {
    Ok(params)
}

// ============================================================================
// server.stats
// ============================================================================

fn server_stats_tool() -> RegisteredTool {
    ToolBuilder::new("server.stats")
        .description(
            "Server telemetry: uptime, request rates, per-operation latency, cache and session counts",
        )
        .build(server_stats_handler)
}

async fn server_stats_handler(ctx: ToolContext, _params: Value) -> Result<Value> {
    Ok(serde_json::to_value(ctx.server.telemetry())?)
}
