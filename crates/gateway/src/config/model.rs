//! Data models for the gateway's configuration document.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use xzcli_gateway_types::{EnvSource, EnvVar};

/// Errors that can occur while loading, interpolating, or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("interpolation error: {0}")]
    Interpolation(#[from] super::interpolation::InterpolationError),

    #[error("validation error: {0}")]
    Validation(#[from] super::validation::ValidationError),
}

/// The gateway's top-level configuration document (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    /// Legacy single-endpoint form.
    #[serde(rename = "mcpEndpoint", default, skip_serializing_if = "Option::is_none")]
    pub mcp_endpoint: Option<String>,

    /// Preferred multi-endpoint form. Placeholder/empty entries are filtered during validation.
    #[serde(rename = "mcpEndpoints", default)]
    pub mcp_endpoints: Vec<String>,

    /// Upstream MCP servers, keyed by unique service name.
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, ServiceConfig>,

    /// Custom (non-MCP) tools.
    #[serde(rename = "customMCP", default)]
    pub custom_mcp: CustomMcpConfig,

    /// Connection defaults (heartbeat/timeout/reconnect).
    #[serde(default)]
    pub connection: ConnectionDefaults,
}

/// Custom tool registry section of the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CustomMcpConfig {
    #[serde(default)]
    pub tools: Vec<crate::types::tool::CustomToolConfig>,
}

/// Connection-wide defaults applied when a service doesn't override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDefaults {
    pub heartbeat_interval_ms: u64,
    pub timeout_ms: u64,
    pub reconnect_max_attempts: u32,
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            timeout_ms: 30_000,
            reconnect_max_attempts: 10,
        }
    }
}

/// Transport kind for an upstream MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Stdio,
    Sse,
    StreamableHttp,
}

impl TransportKind {
    /// Normalize legacy/alternate spellings seen in the wild (§6.3).
    pub fn normalize_str(raw: &str) -> Option<Self> {
        match raw {
            "stdio" => Some(TransportKind::Stdio),
            "sse" | "s_se" | "s-se" => Some(TransportKind::Sse),
            "streamable-http" | "streamable_http" | "streamableHttp" => Some(TransportKind::StreamableHttp),
            _ => None,
        }
    }
}

/// Configuration for a single upstream MCP server (§3 `ServiceConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceConfig {
    /// Explicit transport kind; when absent it is inferred from `command` vs `url`.
    #[serde(rename = "type")]
    pub transport_kind: Option<String>,

    /// Command to execute for stdio transport (required for stdio).
    pub command: Option<String>,

    /// Arguments to pass to the command.
    pub args: Option<Vec<String>>,

    /// Environment variables to set for the process.
    #[serde(default, deserialize_with = "deserialize_environment_variables", skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,

    /// Working directory for the process.
    pub cwd: Option<PathBuf>,

    /// Base URL for SSE/streamable-HTTP transport (required for those kinds).
    pub url: Option<Url>,

    /// HTTP headers to include in requests.
    #[serde(default, deserialize_with = "deserialize_environment_variables", skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<EnvVar>>,

    /// Bearer API key used when no explicit `Authorization` header is set.
    pub api_key: Option<String>,

    /// Per-call timeout override in milliseconds.
    pub timeout_ms: Option<u64>,

    /// Reconnect policy override.
    pub reconnect: Option<ReconnectPolicy>,

    /// Ping/health-check policy override.
    pub ping: Option<PingPolicy>,

    /// Whether this server is disabled.
    pub disabled: Option<bool>,

    /// Optional tags for display/filtering.
    pub tags: Option<Vec<String>>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            transport_kind: None,
            command: None,
            args: None,
            env: None,
            cwd: None,
            url: None,
            headers: None,
            api_key: None,
            timeout_ms: None,
            reconnect: None,
            ping: None,
            disabled: Some(false),
            tags: None,
        }
    }
}

impl ServiceConfig {
    /// Resolve the effective transport kind, preferring an explicit `type`
    /// field (after legacy normalization) and falling back to structural
    /// inference from `command`/`url`.
    pub fn resolve_transport_kind(&self) -> Option<TransportKind> {
        if let Some(raw) = &self.transport_kind {
            return TransportKind::normalize_str(raw);
        }
        if self.command.is_some() {
            return Some(TransportKind::Stdio);
        }
        if self.url.is_some() {
            return Some(TransportKind::StreamableHttp);
        }
        None
    }

    /// Whether this server is disabled in config.
    pub fn is_disabled(&self) -> bool {
        self.disabled.unwrap_or(false)
    }
}

/// Backoff strategy and bounds for service reconnection (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    #[serde(default)]
    pub strategy: BackoffStrategy,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub jitter_amount: f64,
}

fn default_initial_delay_ms() -> u64 {
    500
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    10
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            jitter_amount: 0.0,
        }
    }
}

/// Backoff growth shape for reconnect delays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

/// Ping-based health-check policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingPolicy {
    #[serde(default = "default_ping_enabled")]
    pub enabled: bool,
    #[serde(default = "default_ping_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_ping_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_ping_enabled() -> bool {
    true
}
fn default_ping_interval_ms() -> u64 {
    30_000
}
fn default_ping_failure_threshold() -> u32 {
    2
}

impl Default for PingPolicy {
    fn default() -> Self {
        Self {
            enabled: default_ping_enabled(),
            interval_ms: default_ping_interval_ms(),
            failure_threshold: default_ping_failure_threshold(),
        }
    }
}

fn default_effective_flag() -> bool {
    true
}

/// Deserialize environment/header variables supporting both list and map formats.
fn deserialize_environment_variables<'de, D>(deserializer: D) -> Result<Option<Vec<EnvVar>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw_collection = Option::<RawEnvironmentVariableCollection>::deserialize(deserializer)?;
    Ok(raw_collection.map(|collection| collection.into_environment_variables()))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEnvironmentVariableCollection {
    List(Vec<RawEnvironmentVariable>),
    Map(HashMap<String, RawEnvironmentVariableValue>),
}

impl RawEnvironmentVariableCollection {
    fn into_environment_variables(self) -> Vec<EnvVar> {
        match self {
            RawEnvironmentVariableCollection::List(list) => {
                list.into_iter().map(RawEnvironmentVariable::into_environment_variable).collect()
            }
            RawEnvironmentVariableCollection::Map(map) => {
                let mut variables: Vec<EnvVar> = map.into_iter().map(|(key, value)| value.into_environment_variable(key)).collect();
                variables.sort_by(|a, b| a.key.cmp(&b.key));
                variables
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvironmentVariable {
    key: String,
    value: String,
    #[serde(default)]
    source: Option<EnvSource>,
    #[serde(default)]
    effective: Option<bool>,
}

impl RawEnvironmentVariable {
    fn into_environment_variable(self) -> EnvVar {
        let RawEnvironmentVariable { key, value, source, effective } = self;
        let environment_source = compute_environment_source(source, &value);
        EnvVar {
            key,
            value,
            source: environment_source,
            effective: effective.unwrap_or_else(default_effective_flag),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEnvironmentVariableValue {
    Simple(String),
    Detailed(RawEnvironmentVariableDetail),
}

impl RawEnvironmentVariableValue {
    fn into_environment_variable(self, key: String) -> EnvVar {
        match self {
            RawEnvironmentVariableValue::Simple(value) => {
                let environment_source = compute_environment_source(None, &value);
                EnvVar {
                    key,
                    value,
                    source: environment_source,
                    effective: default_effective_flag(),
                }
            }
            RawEnvironmentVariableValue::Detailed(detail) => detail.into_environment_variable(key),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvironmentVariableDetail {
    value: String,
    #[serde(default)]
    source: Option<EnvSource>,
    #[serde(default)]
    effective: Option<bool>,
}

impl RawEnvironmentVariableDetail {
    fn into_environment_variable(self, key: String) -> EnvVar {
        let environment_source = compute_environment_source(self.source, &self.value);
        EnvVar {
            key,
            value: self.value,
            source: environment_source,
            effective: self.effective.unwrap_or_else(default_effective_flag),
        }
    }
}

/// Determine the environment variable source, honoring explicitly provided metadata.
fn compute_environment_source(provided_source: Option<EnvSource>, value: &str) -> EnvSource {
    if let Some(source) = provided_source {
        return source;
    }
    super::interpolation::determine_env_source(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_stdio_and_sse_servers() {
        let json = r#"{
          "mcpServers": {
            "calc": {
              "command": "node",
              "args": ["calc.js"],
              "env": [{"key": "FOO", "value": "bar"}]
            },
            "remote": {
              "type": "sse",
              "url": "https://mcp.example.com/events",
              "apiKey": "${env:REMOTE_KEY}"
            }
          }
        }"#;

        let cfg: GatewayConfig = serde_json::from_str(json).expect("config deserializes");
        let calc = cfg.mcp_servers.get("calc").unwrap();
        assert_eq!(calc.resolve_transport_kind(), Some(TransportKind::Stdio));

        let remote = cfg.mcp_servers.get("remote").unwrap();
        assert_eq!(remote.resolve_transport_kind(), Some(TransportKind::Sse));
    }

    #[test]
    fn normalizes_legacy_transport_kind_strings() {
        assert_eq!(TransportKind::normalize_str("streamable_http"), Some(TransportKind::StreamableHttp));
        assert_eq!(TransportKind::normalize_str("s_se"), Some(TransportKind::Sse));
        assert_eq!(TransportKind::normalize_str("bogus"), None);
    }
}
