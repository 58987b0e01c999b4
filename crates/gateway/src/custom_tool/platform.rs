//! PLATFORM-proxy handler: fixed vendor workflow adapters (§4.4). The
//! gateway ships with a single HTTP-driven workflow adapter rather than a
//! general workflow engine (an explicit non-goal) — it triggers a named
//! workflow on a configured platform base URL and maps the response into
//! the `{content, isError}` tool-result shape.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayError;

use super::handler::CustomToolHandler;

/// Static configuration for one platform the registry can dispatch to.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub base_url: String,
    pub token: Option<String>,
}

struct WorkflowPlatformHandler {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    workflow_id: String,
}

#[async_trait]
impl CustomToolHandler for WorkflowPlatformHandler {
    async fn invoke(&self, arguments: Value) -> Result<Value, GatewayError> {
        let url = format!("{}/workflows/{}/runs", self.base_url.trim_end_matches('/'), self.workflow_id);
        let mut request = self.client.post(&url).json(&arguments);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|error| GatewayError::Upstream(error.to_string()))?;
        if !response.status().is_success() {
            return Ok(serde_json::json!({
                "isError": true,
                "content": [{"type": "text", "text": format!("workflow platform returned status {}", response.status())}],
            }));
        }

        let body: Value = response.json().await.map_err(|error| GatewayError::Upstream(error.to_string()))?;
        let text = body.get("summary").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| body.to_string());

        Ok(serde_json::json!({
            "isError": false,
            "content": [{"type": "text", "text": text}],
        }))
    }
}

/// Registry of platforms the `PLATFORM`-kind handler can target, keyed by
/// platform name (e.g. `"workflow"`).
#[derive(Default)]
pub struct PlatformRegistry {
    platforms: HashMap<String, PlatformConfig>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, platform: impl Into<String>, config: PlatformConfig) {
        self.platforms.insert(platform.into(), config);
    }

    pub fn resolve(&self, platform: &str, workflow_id: &str) -> Option<Arc<dyn CustomToolHandler>> {
        let config = self.platforms.get(platform)?;
        Some(Arc::new(WorkflowPlatformHandler {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            token: config.token.clone(),
            workflow_id: workflow_id.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_platform_resolves_to_none() {
        let registry = PlatformRegistry::new();
        assert!(registry.resolve("workflow", "deploy").is_none());
    }

    #[test]
    fn registered_platform_resolves_a_handler() {
        let mut registry = PlatformRegistry::new();
        registry.register("workflow", PlatformConfig { base_url: "https://platform.example.com".to_string(), token: None });
        assert!(registry.resolve("workflow", "deploy").is_some());
    }
}
