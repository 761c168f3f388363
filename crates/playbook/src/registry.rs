//! Tool registry: definitions plus async handlers, keyed by name.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use vx_domain::message::ToolDefinition;
use vx_domain::{Error, Result};

/// A callable tool. Handlers must be cheap to clone behind an `Arc` and
/// safe to call concurrently across sessions.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<Value>;
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        let name = definition.name.clone();
        self.tools
            .write()
            .insert(name.clone(), RegisteredTool { definition, handler });
        tracing::debug!(tool = %name, "tool registered");
    }

    /// Register a plain async closure as a tool.
    pub fn register_fn<F, Fut>(
        &self,
        name: &str,
        description: &str,
        parameters: Value,
        f: F,
    ) where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(
            ToolDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
            Arc::new(FnHandler(f)),
        );
    }

    /// Definitions for the requested names, in request order. Unknown
    /// names are skipped with a warning — a stage may list tools that
    /// were never registered.
    pub fn definitions(&self, names: &[String]) -> Vec<ToolDefinition> {
        let tools = self.tools.read();
        names
            .iter()
            .filter_map(|name| match tools.get(name) {
                Some(t) => Some(t.definition.clone()),
                None => {
                    tracing::warn!(tool = %name, "stage references unregistered tool");
                    None
                }
            })
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Execute a tool by name with the given arguments.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> Result<Value> {
        let handler = {
            let tools = self.tools.read();
            tools
                .get(name)
                .map(|t| t.handler.clone())
                .ok_or_else(|| Error::Tool {
                    name: name.into(),
                    message: "not registered".into(),
                })?
        };
        handler.call(arguments).await
    }
}

struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn call(&self, arguments: Value) -> Result<Value> {
        (self.0)(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with_weather() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry.register_fn(
            "get_weather",
            "Current weather for a city.",
            json!({"type": "object", "properties": {"city": {"type": "string"}}}),
            |args| async move {
                let city = args.get("city").and_then(|c| c.as_str()).unwrap_or("?");
                Ok(json!({"city": city, "temp": 22, "condition": "cloudy"}))
            },
        );
        registry
    }

    #[tokio::test]
    async fn dispatch_runs_handler() {
        let registry = registry_with_weather();
        let result = registry
            .dispatch("get_weather", json!({"city": "Tokyo"}))
            .await
            .unwrap();
        assert_eq!(result["city"], "Tokyo");
        assert_eq!(result["temp"], 22);
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_errors() {
        let registry = ToolRegistry::new();
        let err = registry.dispatch("ghost", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Tool { .. }));
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let registry = ToolRegistry::new();
        registry.register_fn("broken", "always fails", json!({}), |_| async {
            Err(Error::Tool {
                name: "broken".into(),
                message: "boom".into(),
            })
        });
        assert!(registry.dispatch("broken", json!({})).await.is_err());
    }

    #[test]
    fn definitions_preserve_request_order_and_skip_unknown() {
        let registry = registry_with_weather();
        registry.register_fn("end_call", "Hang up.", json!({}), |_| async {
            Ok(json!({"ok": true}))
        });

        let defs = registry.definitions(&[
            "end_call".to_string(),
            "ghost".to_string(),
            "get_weather".to_string(),
        ]);
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["end_call", "get_weather"]);
    }
}
