//! `ProxyServer`: one outbound WebSocket client per downstream endpoint
//! (§4.5). Connects out to the configured endpoint URL, then serves
//! `tools/list` / `tools/call` / `ping` JSON-RPC requests arriving over
//! that connection. Socket handling (connect, text/binary/ping frame
//! dispatch, id correlation) is grounded on the teacher-adjacent
//! `other_examples` WebSocket MCP client; the direction is inverted here —
//! this gateway answers requests rather than issuing them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use crate::custom_tool::CustomToolRegistry;
use crate::error::{GatewayError, TransportError};
use crate::event_bus::{EventBus, GatewayEvent};
use crate::manager::ServiceManager;
use crate::types::call_record::{CallRecord, CallRecordRing};

use super::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use super::metrics::PerformanceMetrics;
use super::retry::{execute_with_retry, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Per-call dispatch configuration, mutable at runtime via
/// `update_tool_call_config`/`update_retry_config`.
#[derive(Debug, Clone)]
pub struct ToolCallConfig {
    pub timeout_ms: u64,
}

impl Default for ToolCallConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

pub struct ProxyServer {
    endpoint: String,
    headers: Vec<(String, String)>,
    services: Arc<ServiceManager>,
    custom_tools: Arc<CustomToolRegistry>,
    events: EventBus,
    state: RwLock<ProxyState>,
    tool_call_config: RwLock<ToolCallConfig>,
    retry_policy: RwLock<RetryPolicy>,
    metrics: Mutex<PerformanceMetrics>,
    history: Mutex<CallRecordRing>,
}

impl ProxyServer {
    pub fn new(endpoint: String, headers: Vec<(String, String)>, services: Arc<ServiceManager>, custom_tools: Arc<CustomToolRegistry>, events: EventBus) -> Self {
        Self {
            endpoint,
            headers,
            services,
            custom_tools,
            events,
            state: RwLock::new(ProxyState::Disconnected),
            tool_call_config: RwLock::new(ToolCallConfig::default()),
            retry_policy: RwLock::new(RetryPolicy::default()),
            metrics: Mutex::new(PerformanceMetrics::default()),
            history: Mutex::new(CallRecordRing::default()),
        }
    }

    pub async fn state(&self) -> ProxyState {
        *self.state.read().await
    }

    pub async fn metrics(&self) -> PerformanceMetrics {
        self.metrics.lock().await.clone()
    }

    pub async fn reset_metrics(&self) {
        self.metrics.lock().await.reset();
    }

    /// Snapshot of the last N call outcomes (newest last), per the
    /// ring-bounded `CallRecord` history (§3).
    pub async fn recent_calls(&self) -> Vec<CallRecord> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub async fn update_tool_call_config(&self, timeout_ms: Option<u64>) {
        if let Some(timeout_ms) = timeout_ms {
            self.tool_call_config.write().await.timeout_ms = timeout_ms;
        }
    }

    pub async fn update_retry_config(&self, max_attempts: Option<u32>, initial_delay_ms: Option<u64>, max_delay_ms: Option<u64>) {
        let mut policy = self.retry_policy.write().await;
        if let Some(value) = max_attempts {
            policy.max_attempts = value;
        }
        if let Some(value) = initial_delay_ms {
            policy.initial_delay_ms = value;
        }
        if let Some(value) = max_delay_ms {
            policy.max_delay_ms = value;
        }
    }

    /// Connect out to the endpoint and serve requests until `shutdown`
    /// fires or the socket closes. Reconnects with exponential backoff
    /// (jitter disabled, per §4.5) on connection loss.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return;
            }

            *self.state.write().await = if attempt == 0 { ProxyState::Connecting } else { ProxyState::Reconnecting };

            match self.connect().await {
                Ok(socket) => {
                    attempt = 0;
                    *self.state.write().await = ProxyState::Connected;
                    self.events.publish(GatewayEvent::EndpointStatusChanged {
                        endpoint: self.endpoint.clone(),
                        connected: true,
                        operation: "connect",
                    });

                    self.serve(socket, &mut shutdown).await;

                    *self.state.write().await = ProxyState::Disconnected;
                    self.events.publish(GatewayEvent::EndpointStatusChanged {
                        endpoint: self.endpoint.clone(),
                        connected: false,
                        operation: "disconnect",
                    });
                }
                Err(error) => {
                    tracing::warn!(endpoint = self.endpoint.as_str(), %error, "proxy connect failed");
                }
            }

            if *shutdown.borrow() {
                return;
            }

            attempt += 1;
            let delay_ms = (500u64.saturating_mul(2u64.saturating_pow(attempt.min(10) - 1))).min(30_000);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn connect(&self) -> Result<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>, TransportError> {
        let mut request = self.endpoint.clone().into_client_request().map_err(|error| TransportError::WebSocket(error.to_string()))?;
        for (key, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(value)) {
                request.headers_mut().insert(name, value);
            }
        }
        let (stream, _response) = tokio_tungstenite::connect_async(request).await.map_err(|error| TransportError::WebSocket(error.to_string()))?;
        Ok(stream)
    }

    async fn serve(self: &Arc<Self>, mut socket: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>, shutdown: &mut watch::Receiver<bool>) {
        loop {
            tokio::select! {
                message = socket.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = self.handle_frame(&text).await {
                                if socket.send(Message::Text(reply.into())).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = socket.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => return,
                        Some(Ok(_)) => {}
                        Some(Err(error)) => {
                            tracing::debug!(%error, "proxy socket error");
                            return;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = socket.close(None).await;
                        return;
                    }
                }
            }
        }
    }

    async fn handle_frame(self: &Arc<Self>, text: &str) -> Option<String> {
        let request: JsonRpcRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(_) => return None,
        };

        if request.is_notification() {
            return None;
        }

        let id = request.id.clone().unwrap_or(Value::Null);
        let response = match request.method.as_str() {
            "tools/list" => self.handle_tools_list().await,
            "tools/call" => self.handle_tools_call(&id, request.params).await,
            "ping" => Ok(serde_json::json!({"ok": true})),
            other => Err(GatewayError::MethodNotFound(other.to_string())),
        };

        let rpc_response = match response {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error.json_rpc_code(), error.to_string()),
        };

        serde_json::to_string(&rpc_response).ok()
    }

    async fn handle_tools_list(&self) -> Result<Value, GatewayError> {
        let mcp_tools = self.services.list_exposed_tools().await;
        let custom_tools = self.custom_tools.list().await;

        let mut tools: Vec<Value> = mcp_tools
            .into_iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.exposed_name(),
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect();

        tools.extend(custom_tools.into_iter().map(|tool| {
            serde_json::json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": tool.input_schema,
            })
        }));

        Ok(serde_json::json!({"tools": tools}))
    }

    async fn handle_tools_call(self: &Arc<Self>, id: &Value, params: Value) -> Result<Value, GatewayError> {
        let name = params.get("name").and_then(Value::as_str).ok_or_else(|| GatewayError::InvalidParams("'name' must be a non-empty string".to_string()))?;
        if name.is_empty() {
            return Err(GatewayError::InvalidParams("'name' must be a non-empty string".to_string()));
        }

        let arguments = match params.get("arguments") {
            Some(Value::Null) | None => Value::Object(Default::default()),
            Some(Value::Object(map)) => Value::Object(map.clone()),
            Some(_) => return Err(GatewayError::InvalidParams("'arguments' must be an object or null".to_string())),
        };

        let timeout_ms = self.tool_call_config.read().await.timeout_ms;
        let policy = self.retry_policy.read().await.clone();
        let name = name.to_string();
        let record_id = id.to_string();

        let start = Instant::now();
        let this = Arc::clone(self);
        let name_for_retry = name.clone();
        let result = execute_with_retry(&policy, move || {
            let this = Arc::clone(&this);
            let name = name_for_retry.clone();
            let arguments = arguments.clone();
            async move {
                match tokio::time::timeout(Duration::from_millis(timeout_ms), this.dispatch_tool_call(&name, arguments)).await {
                    Ok(inner) => inner,
                    Err(_) => Err(GatewayError::ToolTimeout(Duration::from_millis(timeout_ms))),
                }
            }
        })
        .await;

        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_millis() as f64;
        self.metrics.lock().await.record(elapsed_ms, result.is_ok());
        self.history.lock().await.push(CallRecord {
            id: record_id,
            tool_name: name,
            start_time: start,
            duration: elapsed,
            success: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
        });
        result
    }

    async fn dispatch_tool_call(&self, name: &str, arguments: Value) -> Result<Value, GatewayError> {
        if self.custom_tools.contains(name).await {
            return Ok(self.custom_tools.call_tool(name, arguments, None).await);
        }
        self.services.call_exposed_tool(name, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::config::GatewayConfig;
    use crate::custom_tool::{CustomToolRegistry, FunctionRegistry, PlatformRegistry};
    use crate::logging::audit::AuditLogger;

    async fn test_server() -> Arc<ProxyServer> {
        let events = EventBus::default();
        let services = Arc::new(ServiceManager::new(GatewayConfig::default(), events.clone(), Arc::new(AuditLogger::disabled())));
        let custom_tools = Arc::new(CustomToolRegistry::new(
            Arc::new(FunctionRegistry::new()),
            Arc::new(PlatformRegistry::new()),
            Arc::clone(&services),
            Arc::new(CacheManager::new(std::env::temp_dir().join("test-mcp-cache.json"))),
            Arc::new(AuditLogger::disabled()),
        ));
        Arc::new(ProxyServer::new("wss://example.com/mcp".to_string(), vec![], services, custom_tools, events))
    }

    #[tokio::test]
    async fn invalid_params_rejects_empty_tool_name() {
        let server = test_server().await;
        let result = server.handle_tools_call(&Value::Null, serde_json::json!({"name": ""})).await;
        assert!(matches!(result, Err(GatewayError::InvalidParams(_))));
    }

    #[tokio::test]
    async fn invalid_params_rejects_non_object_arguments() {
        let server = test_server().await;
        let result = server.handle_tools_call(&Value::Null, serde_json::json!({"name": "x", "arguments": "not-an-object"})).await;
        assert!(matches!(result, Err(GatewayError::InvalidParams(_))));
    }

    #[tokio::test]
    async fn unknown_tool_reports_not_found() {
        let server = test_server().await;
        let result = server.handle_tools_call(&Value::Null, serde_json::json!({"name": "does_not_exist"})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn handle_frame_ignores_notifications() {
        let server = test_server().await;
        let reply = server.handle_frame(r#"{"jsonrpc":"2.0","method":"ping","params":{}}"#).await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn failed_call_is_recorded_in_history() {
        let server = test_server().await;
        let _ = server.handle_tools_call(&serde_json::json!(3), serde_json::json!({"name": "does_not_exist"})).await;
        let history = server.recent_calls().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "3");
        assert!(!history[0].success);
    }

    #[tokio::test]
    async fn handle_frame_answers_ping_with_id() {
        let server = test_server().await;
        let reply = server.handle_frame(r#"{"jsonrpc":"2.0","method":"ping","params":{},"id":7}"#).await.unwrap();
        let value: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["result"]["ok"], true);
    }
}
