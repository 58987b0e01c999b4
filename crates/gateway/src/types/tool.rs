//! Tool descriptors, the exposed-name namespacing rule (§3/§6.1), and
//! custom-tool configuration shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The reserved infix separating a namespaced service name from the
/// original tool name in an exposed tool name. Must never appear inside an
/// `originalName`.
pub const NAMESPACE_SEPARATOR: &str = "_xzcli_";

/// Normalize a service name for use in an exposed tool name: replace `-`
/// with `_`. Idempotent — normalizing twice yields the same string.
pub fn normalize_service_name(service_name: &str) -> String {
    service_name.replace('-', "_")
}

/// Build the exposed (namespaced) tool name for a service/tool pair.
pub fn exposed_tool_name(service_name: &str, original_name: &str) -> String {
    format!("{}{}{}", normalize_service_name(service_name), NAMESPACE_SEPARATOR, original_name)
}

/// Split an exposed tool name back into `(normalized_service_name, original_name)`.
/// Returns `None` if the reserved separator is absent.
pub fn split_exposed_tool_name(exposed: &str) -> Option<(&str, &str)> {
    exposed.split_once(NAMESPACE_SEPARATOR)
}

/// Per-tool invocation statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolStats {
    pub usage_count: u64,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A tool exposed by one upstream service (§3 `ToolDescriptor`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub original_name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub service_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub stats: ToolStats,
}

fn default_enabled() -> bool {
    true
}

impl ToolDescriptor {
    /// The namespaced name this tool is exposed as to downstream endpoints.
    pub fn exposed_name(&self) -> String {
        exposed_tool_name(&self.service_name, &self.original_name)
    }
}

/// A custom (non-MCP) tool's handler kind (§3/§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomToolHandlerConfig {
    /// A statically-registered Rust closure, looked up by `registry_key`.
    Function { registry_key: String },
    /// An HTTP request template.
    Http {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default)]
        headers: std::collections::HashMap<String, String>,
        #[serde(default)]
        auth: Option<HttpAuthConfig>,
        #[serde(default)]
        body_template: Option<Value>,
        #[serde(default)]
        data_path: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        retry_count: Option<u32>,
        #[serde(default)]
        retry_delay_ms: Option<u64>,
    },
    /// A reference to an existing upstream tool, exposed under a new global name.
    McpReference { service_name: String, tool_name: String },
    /// A fixed platform adapter (e.g. a vendor workflow platform).
    Platform { platform: String, workflow_id: String },
}

fn default_http_method() -> String {
    "POST".to_string()
}

/// Authentication mode for the HTTP custom-tool handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum HttpAuthConfig {
    Bearer { token: String },
    Basic { username: String, password: String },
    ApiKeyHeader { header_name: String, value: String },
}

/// A custom tool definition as it appears in `customMCP.tools` (§3 `CustomTool`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomToolConfig {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_object_schema")]
    pub input_schema: Value,
    pub handler: CustomToolHandlerConfig,
}

fn default_object_schema() -> Value {
    serde_json::json!({"type": "object"})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_service_name_replaces_hyphens() {
        assert_eq!(normalize_service_name("my-service"), "my_service");
        assert_eq!(normalize_service_name(&normalize_service_name("my-service")), "my_service");
    }

    #[test]
    fn exposed_name_round_trips() {
        let exposed = exposed_tool_name("my-service", "add");
        assert_eq!(exposed, "my_service_xzcli_add");
        let (service, tool) = split_exposed_tool_name(&exposed).unwrap();
        assert_eq!(service, "my_service");
        assert_eq!(tool, "add");
    }

    #[test]
    fn split_returns_none_without_separator() {
        assert!(split_exposed_tool_name("no-separator-here").is_none());
    }
}
