//! The custom-tool handler dispatch trait and registry (§4.4).
//!
//! Handlers are a sealed tagged variant per the teacher's `McpClient`-style
//! async-method dispatch: each kind implements [`CustomToolHandler`] and the
//! registry holds them behind `Arc<dyn CustomToolHandler>`, matching the
//! dispatch-by-tag design note in the gateway's design notes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::cache::manager::CacheManager;
use crate::error::GatewayError;
use crate::logging::audit::{AuditEntry, AuditLogger, AuditResult};
use crate::manager::ServiceManager;
use crate::types::cache::cache_key;
use crate::types::tool::{CustomToolConfig, CustomToolHandlerConfig};

use super::function::FunctionRegistry;
use super::http_handler::HttpHandler;
use super::platform::PlatformRegistry;

/// Default internal deadline for a custom tool invocation (§4.4).
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 8_000;

/// One kind of custom-tool execution logic.
#[async_trait]
pub trait CustomToolHandler: Send + Sync {
    async fn invoke(&self, arguments: Value) -> Result<Value, GatewayError>;
}

struct McpReferenceHandler {
    service_manager: Arc<ServiceManager>,
    service_name: String,
    tool_name: String,
}

#[async_trait]
impl CustomToolHandler for McpReferenceHandler {
    async fn invoke(&self, arguments: Value) -> Result<Value, GatewayError> {
        let exposed = ServiceManager::exposed_name_for(&self.service_name, &self.tool_name);
        self.service_manager.call_exposed_tool(&exposed, arguments).await
    }
}

/// A registered custom tool: its declared shape plus the handler that executes it.
pub struct CustomTool {
    pub config: CustomToolConfig,
    pub handler: Arc<dyn CustomToolHandler>,
}

/// Registry of custom tools, re-initialized atomically on `config:updated`
/// (build a new map, then swap) so `list()` is always an O(1) snapshot read
/// even mid-reload.
pub struct CustomToolRegistry {
    tools: RwLock<Arc<HashMap<String, CustomTool>>>,
    functions: Arc<FunctionRegistry>,
    platforms: Arc<PlatformRegistry>,
    service_manager: Arc<ServiceManager>,
    cache: Arc<CacheManager>,
    audit: Arc<AuditLogger>,
}

impl CustomToolRegistry {
    pub fn new(functions: Arc<FunctionRegistry>, platforms: Arc<PlatformRegistry>, service_manager: Arc<ServiceManager>, cache: Arc<CacheManager>, audit: Arc<AuditLogger>) -> Self {
        Self {
            tools: RwLock::new(Arc::new(HashMap::new())),
            functions,
            platforms,
            service_manager,
            cache,
            audit,
        }
    }

    /// Rebuild the tool map from configuration and swap it in atomically.
    pub async fn reload(&self, configs: Vec<CustomToolConfig>) {
        let mut tools = HashMap::new();
        for config in configs {
            let handler: Arc<dyn CustomToolHandler> = match &config.handler {
                CustomToolHandlerConfig::Function { registry_key } => match self.functions.resolve(registry_key) {
                    Some(handler) => handler,
                    None => {
                        tracing::warn!(tool = config.name.as_str(), registry_key, "function registry key not found, skipping tool");
                        continue;
                    }
                },
                CustomToolHandlerConfig::Http { .. } => Arc::new(HttpHandler::from_config(&config.handler)),
                CustomToolHandlerConfig::McpReference { service_name, tool_name } => Arc::new(McpReferenceHandler {
                    service_manager: Arc::clone(&self.service_manager),
                    service_name: service_name.clone(),
                    tool_name: tool_name.clone(),
                }),
                CustomToolHandlerConfig::Platform { platform, workflow_id } => match self.platforms.resolve(platform, workflow_id) {
                    Some(handler) => handler,
                    None => {
                        tracing::warn!(tool = config.name.as_str(), platform, "unknown platform adapter, skipping tool");
                        continue;
                    }
                },
            };
            tools.insert(config.name.clone(), CustomTool { config, handler });
        }

        *self.tools.write().await = Arc::new(tools);
    }

    /// Non-blocking snapshot of the currently registered tool configs.
    pub async fn list(&self) -> Vec<CustomToolConfig> {
        self.tools.read().await.values().map(|tool| tool.config.clone()).collect()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// Execute the §4.4 `callTool` algorithm: cache lookup, timeout race,
    /// and cache write on timeout/completion/failure.
    pub async fn call_tool(&self, name: &str, arguments: Value, timeout_ms: Option<u64>) -> Value {
        let tool = {
            let snapshot = self.tools.read().await;
            match snapshot.get(name) {
                Some(tool) => Arc::new(CustomTool {
                    config: tool.config.clone(),
                    handler: Arc::clone(&tool.handler),
                }),
                None => return error_result(format!("custom tool '{name}' not found")),
            }
        };

        let key = cache_key(name, &arguments);

        if let Some(result) = self.cache.take_once(&key).await {
            return result;
        }

        let deadline = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TOOL_TIMEOUT_MS));

        // The upstream call keeps running past the client-facing deadline
        // (§4.4/§5): it is raced against the timeout from outside, not
        // cancelled by it, so a slow completion still lands in the cache.
        let handler = Arc::clone(&tool.handler);
        let cache = Arc::clone(&self.cache);
        let audit = Arc::clone(&self.audit);
        let task_key = key.clone();
        let task_name = name.to_string();
        let wrap_result = wraps_raw_value(&tool.config.handler);
        let handle = tokio::spawn(async move {
            match handler.invoke(arguments).await {
                Ok(result) => {
                    let result = if wrap_result { text_content_result(result) } else { result };
                    cache.put_completed(task_key, result.clone()).await;
                    audit.log(AuditEntry::tool_invoke(String::new(), task_name, AuditResult::Success)).await;
                    Ok(result)
                }
                Err(error) => {
                    cache.put_failed(task_key).await;
                    audit.log(AuditEntry::tool_invoke(String::new(), task_name, AuditResult::Failure)).await;
                    Err(error.to_string())
                }
            }
        });

        match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(error))) => error_result(error),
            Ok(Err(join_error)) => error_result(join_error.to_string()),
            Err(_) => {
                self.cache.put_pending(key.clone()).await;
                serde_json::json!({
                    "content": [{"type": "text", "text": "This is taking longer than expected. Check back shortly for the result."}],
                    "taskId": key,
                })
            }
        }
    }
}

fn error_result(message: String) -> Value {
    serde_json::json!({
        "isError": true,
        "content": [{"type": "text", "text": message}],
    })
}

/// Wrap a raw value in the MCP tool-result envelope, pretty-printing it to
/// text the same way a downstream client would render a JSON result.
fn text_content_result(value: Value) -> Value {
    let text = match &value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    };
    serde_json::json!({
        "content": [{"type": "text", "text": text}],
    })
}

/// Whether `call_tool` should wrap a handler's raw return value in the MCP
/// `{content:[{type:"text",...}]}` envelope before caching/returning it.
/// `McpReference` already returns an upstream MCP result, and `Platform`
/// builds the envelope itself, so only `Function`/`Http` need wrapping.
fn wraps_raw_value(config: &CustomToolHandlerConfig) -> bool {
    matches!(config, CustomToolHandlerConfig::Function { .. } | CustomToolHandlerConfig::Http { .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_result_pretty_prints_an_object_value() {
        let wrapped = text_content_result(serde_json::json!({"msg": "hi"}));
        assert_eq!(wrapped, serde_json::json!({"content": [{"type": "text", "text": "{\n  \"msg\": \"hi\"\n}"}]}));
    }

    #[test]
    fn text_content_result_passes_a_string_value_through_unquoted() {
        let wrapped = text_content_result(serde_json::json!("already text"));
        assert_eq!(wrapped, serde_json::json!({"content": [{"type": "text", "text": "already text"}]}));
    }

    #[test]
    fn only_function_and_http_handlers_get_wrapped() {
        assert!(wraps_raw_value(&CustomToolHandlerConfig::Function { registry_key: "k".to_string() }));
        assert!(wraps_raw_value(&CustomToolHandlerConfig::Http {
            url: "https://example.com".to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            auth: None,
            body_template: None,
            data_path: None,
            timeout_ms: None,
            retry_count: None,
            retry_delay_ms: None,
        }));
        assert!(!wraps_raw_value(&CustomToolHandlerConfig::McpReference { service_name: "svc".to_string(), tool_name: "add".to_string() }));
        assert!(!wraps_raw_value(&CustomToolHandlerConfig::Platform { platform: "workflow".to_string(), workflow_id: "deploy".to_string() }));
    }
}
