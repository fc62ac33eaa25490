//! HTTP client for the external tool backend.
//!
//! Every configured operation is forwarded as
//! `POST {base_url}/invoke/{operation}` with the params object as the JSON
//! body. A 2xx JSON response is the result; anything else is a handler error
//! carrying the status and the response body.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::config::ToolConfig;
use crate::dispatch::{RegisteredTool, ToolBuilder};

/// Uniform call interface to the domain handlers.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn invoke(&self, operation: &str, params: &Value) -> Result<Value>;
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a new HttpBackend.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the backend service (e.g., "http://localhost:9000")
    /// * `timeout_secs` - Request timeout in seconds
    pub fn new(base_url: String, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ToolBackend for HttpBackend {
    async fn invoke(&self, operation: &str, params: &Value) -> Result<Value> {
        let url = format!("{}/invoke/{}", self.base_url, operation);
        debug!("Forwarding {} to {}", operation, url);

        let response = self
            .client
            .post(&url)
            .json(params)
            .send()
            .await
            .with_context(|| format!("{} request failed", operation))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "{} failed with status {}: {}",
                operation,
                status,
                body
            ));
        }

        response
            .json()
            .await
            .with_context(|| format!("{} returned a non-JSON body", operation))
    }
}

/// Builds the registry entry for one configured backend operation.
pub fn backend_tool(config: &ToolConfig, backend: Arc<dyn ToolBackend>) -> RegisteredTool {
    let mut builder = ToolBuilder::new(config.name.clone())
        .description(config.description.clone())
        .input_schema(serde_json::json!({
            "type": "object",
            "properties": {},
            "required": config.required,
        }));
    if config.cacheable {
        builder = builder.cacheable(config.cache_ttl_secs.map(Duration::from_secs));
    }

    let operation = config.name.clone();
    builder.build(move |_ctx, params| {
        let backend = backend.clone();
        let operation = operation.clone();
        async move { backend.invoke(&operation, &params).await }
    })
}
