//! Tools
//!
//! Built-in tools plus the operations forwarded to the external backend.

pub mod backend;
pub mod builtin;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::AppConfig;
use crate::dispatch::ToolRegistry;
use backend::HttpBackend;

/// Register all tools with the registry
pub fn register_all_tools(registry: &mut ToolRegistry, config: &AppConfig) -> Result<()> {
    builtin::register_tools(registry)?;

    if let Some(url) = &config.backend_url {
        let backend = Arc::new(HttpBackend::new(url.clone(), config.backend_timeout_sec)?);
        for tool in &config.tools {
            registry.register(backend::backend_tool(tool, backend.clone()))?;
        }
        info!(
            "Forwarding {} operations to backend at {}",
            config.tools.len(),
            backend.base_url()
        );
    }

    Ok(())
}
