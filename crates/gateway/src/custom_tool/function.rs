//! FUNCTION handler: a name-keyed registry of statically-compiled Rust
//! closures, standing in for the source system's "resolve module+entry"
//! dynamic loader (no plugin loaders from that ecosystem are ported, per
//! the gateway's explicit non-goals).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayError;

use super::handler::CustomToolHandler;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The closure shape a FUNCTION tool registers under a `registry_key`.
pub type ToolFn = Arc<dyn Fn(Value) -> BoxFuture<Result<Value, GatewayError>> + Send + Sync>;

struct FunctionHandler {
    func: ToolFn,
}

#[async_trait]
impl CustomToolHandler for FunctionHandler {
    async fn invoke(&self, arguments: Value) -> Result<Value, GatewayError> {
        (self.func)(arguments).await
    }
}

/// Registry of statically-compiled closures, keyed by the config's
/// `registry_key`. Registered once at construction time; there is no
/// runtime module loading.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, ToolFn>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registry_key: impl Into<String>, func: ToolFn) {
        self.functions.insert(registry_key.into(), func);
    }

    pub fn resolve(&self, registry_key: &str) -> Option<Arc<dyn CustomToolHandler>> {
        self.functions.get(registry_key).map(|func| Arc::new(FunctionHandler { func: Arc::clone(func) }) as Arc<dyn CustomToolHandler>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_fn() -> ToolFn {
        Arc::new(|value: Value| Box::pin(async move { Ok(value) }))
    }

    #[tokio::test]
    async fn resolves_and_invokes_registered_function() {
        let mut registry = FunctionRegistry::new();
        registry.register("echo", echo_fn());

        let handler = registry.resolve("echo").expect("registered");
        let result = handler.invoke(serde_json::json!({"a": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!({"a": 1}));
    }

    #[test]
    fn unregistered_key_resolves_to_none() {
        let registry = FunctionRegistry::new();
        assert!(registry.resolve("missing").is_none());
    }
}
