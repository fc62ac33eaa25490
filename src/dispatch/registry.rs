//! Tool registry
//!
//! Maps operation names to handlers. Built once at startup from an explicit
//! registration list and read-only afterwards.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::Value;

use super::context::ToolContext;
use crate::error::ServeError;

/// Boxed future for async tool execution
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Tool handler function type
pub type ToolHandler = Arc<dyn Fn(ToolContext, Value) -> ToolFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    Never,
    /// Cache results; `None` uses the configured default TTL.
    Cacheable { ttl: Option<Duration> },
}

/// A registered tool with metadata and handler
pub struct RegisteredTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub cache: CachePolicy,
    pub handler: ToolHandler,
}

impl RegisteredTool {
    pub fn is_cacheable(&self) -> bool {
        matches!(self.cache, CachePolicy::Cacheable { .. })
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        match self.cache {
            CachePolicy::Cacheable { ttl } => ttl,
            CachePolicy::Never => None,
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            cacheable: self.is_cacheable(),
        }
    }

    /// Basic shape check: params must be an object holding every key the
    /// schema lists as required. Values themselves are not inspected.
    pub fn check_params(&self, params: &Value) -> Result<(), ServeError> {
        let object = params
            .as_object()
            .ok_or_else(|| ServeError::invalid("params must be a JSON object"))?;

        let missing: Vec<&str> = self
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter(|key| !object.contains_key(*key))
            .collect();

        if !missing.is_empty() {
            return Err(ServeError::invalid(format!(
                "{} is missing required params: {}",
                self.name,
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

/// Public description of a tool, as listed by `GET /v1/tools`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub cacheable: bool,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: RegisteredTool) -> Result<()> {
        if self.tools.contains_key(&tool.name) {
            bail!("Tool {} is already registered", tool.name);
        }
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// All tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.values().map(RegisteredTool::definition).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Builder for registering a tool
pub struct ToolBuilder {
    name: String,
    description: String,
    input_schema: Value,
    cache: CachePolicy,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
            cache: CachePolicy::Never,
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn cacheable(mut self, ttl: Option<Duration>) -> Self {
        self.cache = CachePolicy::Cacheable { ttl };
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> RegisteredTool
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        RegisteredTool {
            name: self.name,
            description: self.description,
            input_schema: self.input_schema,
            cache: self.cache,
            handler: Arc::new(move |ctx, params| Box::pin(handler(ctx, params))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(name: &str) -> RegisteredTool {
        ToolBuilder::new(name).build(|_ctx, params| async move { Ok(params) })
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(noop("echo")).unwrap();
        assert!(registry.register(noop("echo")).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_definitions_are_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(noop("zeta")).unwrap();
        registry.register(noop("alpha")).unwrap();
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_check_params_requires_object() {
        let tool = noop("echo");
        assert!(tool.check_params(&json!({})).is_ok());
        assert_eq!(
            tool.check_params(&json!([1, 2])).unwrap_err().kind(),
            "invalid_request"
        );
    }

    #[test]
    fn test_check_params_reports_missing_required_keys() {
        let tool = ToolBuilder::new("scene.get")
            .input_schema(json!({
                "type": "object",
                "properties": {"scene": {"type": "integer"}, "script": {"type": "string"}},
                "required": ["scene", "script"]
            }))
            .build(|_ctx, params| async move { Ok(params) });

        assert!(tool.check_params(&json!({"scene": 1, "script": "a"})).is_ok());
        let error = tool.check_params(&json!({"scene": 1})).unwrap_err();
        assert!(error.to_string().contains("script"));
    }

    #[test]
    fn test_cache_policy() {
        let tool = ToolBuilder::new("search")
            .cacheable(Some(Duration::from_secs(30)))
            .build(|_ctx, params| async move { Ok(params) });
        assert!(tool.is_cacheable());
        assert_eq!(tool.cache_ttl(), Some(Duration::from_secs(30)));
        assert!(tool.definition().cacheable);

        assert!(!noop("x").is_cacheable());
    }
}
