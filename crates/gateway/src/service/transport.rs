//! Upstream MCP transports (§4.2/§6.2): stdio, SSE, and streamable HTTP.
//!
//! Stdio and streamable HTTP are built on `rmcp`'s own client transports,
//! the same approach the teacher's `client/core.rs` uses — there is no
//! reason to hand-roll JSON-RPC framing when the protocol SDK already does
//! it. SSE has no equivalent `rmcp` client transport in this workspace's
//! feature set, so it is hand-rolled, grounded directly on the teacher's
//! `client/http/sse.rs` frame-parsing and reconnect-backoff loop.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::CallToolRequestParams;
use rmcp::service::{RunningService, ServiceExt as _};
use rmcp::RoleClient;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

use crate::config::ServiceConfig;
use crate::error::TransportError;
use crate::types::tool::ToolDescriptor;

/// One upstream MCP transport connection. Implementations own their
/// underlying socket/process exclusively; there is no sharing across
/// `MCPService` instances.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the handshake and leave the transport ready for calls.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Fetch the current tool list from the upstream server.
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, TransportError>;

    /// Invoke a tool and return its raw result payload.
    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value, TransportError>;

    /// A lightweight liveness probe, used by the ping loop (§4.2).
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Tear down the connection.
    async fn disconnect(&mut self);

    /// Short machine-readable transport name, e.g. `"stdio"`.
    fn transport_kind(&self) -> &'static str;
}

/// Build a [`Transport`] implementation appropriate for `config`.
pub fn build_transport(service_name: &str, config: &ServiceConfig) -> Result<Box<dyn Transport>, TransportError> {
    use crate::config::TransportKind;

    match config.resolve_transport_kind() {
        Some(TransportKind::Stdio) => Ok(Box::new(StdioTransport::new(service_name.to_string(), config.clone()))),
        Some(TransportKind::StreamableHttp) => Ok(Box::new(StreamableHttpTransport::new(config.clone()))),
        Some(TransportKind::Sse) => Ok(Box::new(SseTransport::new(config.clone()))),
        None => Err(TransportError::NotConnected),
    }
}

// ---------------------------------------------------------------------
// Stdio
// ---------------------------------------------------------------------

/// Stdio transport: spawns the configured command with a minimized
/// environment and process hardening, then speaks MCP over its stdio pipes
/// via `rmcp`'s `TokioChildProcess`.
pub struct StdioTransport {
    service_name: String,
    config: ServiceConfig,
    service: Option<RunningService<RoleClient, ()>>,
}

impl StdioTransport {
    pub fn new(service_name: String, config: ServiceConfig) -> Self {
        Self {
            service_name,
            config,
            service: None,
        }
    }

    /// Build the child-process command with a cleared, minimal environment
    /// and (on unix) privilege-dropping/hardening applied before exec,
    /// grounded on the teacher's `client/stdio.rs`.
    fn build_command(&self) -> Result<Command, TransportError> {
        let program = self.config.command.as_ref().ok_or(TransportError::NotConnected)?;
        let mut cmd = Command::new(program);

        cmd.env_clear();
        #[cfg(unix)]
        cmd.env("PATH", "/usr/bin:/bin");
        #[cfg(windows)]
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        if let Some(args) = &self.config.args {
            cmd.args(args);
        }
        if let Some(env_vars) = &self.config.env {
            for var in env_vars {
                cmd.env(&var.key, &var.value);
            }
        }
        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use libc::{getgid, getuid, setgid, setuid};
            unsafe {
                cmd.pre_exec(|| {
                    #[cfg(target_os = "linux")]
                    {
                        use libc::{prctl, PR_SET_DUMPABLE};
                        let _ = prctl(PR_SET_DUMPABLE, 0, 0, 0, 0);
                    }
                    #[cfg(all(unix, not(target_os = "linux")))]
                    {
                        use libc::{rlimit, setrlimit, RLIMIT_CORE};
                        let lim = rlimit { rlim_cur: 0, rlim_max: 0 };
                        let _ = setrlimit(RLIMIT_CORE, &lim);
                    }

                    let uid = getuid();
                    let gid = getgid();
                    if setgid(gid) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    if setuid(uid) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        Ok(cmd)
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let cmd = self.build_command()?;
        let (transport, stderr) = rmcp::transport::TokioChildProcess::builder(cmd)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(TransportError::Spawn)?;

        if let Some(mut stderr) = stderr {
            let service_name = self.service_name.clone();
            tokio::spawn(async move {
                use tokio::io::{AsyncBufReadExt, BufReader};
                let mut lines = BufReader::new(&mut stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(service = service_name.as_str(), "stderr: {line}");
                }
            });
        }

        let running = timeout(Duration::from_secs(10), ().serve(transport))
            .await
            .map_err(|_| TransportError::HandshakeTimeout)?
            .map_err(|err| TransportError::Rmcp(err.to_string()))?;

        self.service = Some(running);
        Ok(())
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, TransportError> {
        let service = self.service.as_ref().ok_or(TransportError::NotConnected)?;
        let tools = service.list_all_tools().await.map_err(|err| TransportError::Rmcp(err.to_string()))?;
        Ok(tools.into_iter().map(|tool| tool_descriptor_from_rmcp(&self.service_name, tool)).collect())
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value, TransportError> {
        let service = self.service.as_ref().ok_or(TransportError::NotConnected)?;
        let arguments_map = value_to_object(arguments);
        let result = service
            .call_tool(CallToolRequestParams {
                name: name.to_string().into(),
                arguments: Some(arguments_map),
                task: None,
                meta: None,
            })
            .await
            .map_err(|err| TransportError::Rmcp(err.to_string()))?;
        serde_json::to_value(result).map_err(|err| TransportError::Rmcp(err.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        let service = self.service.as_ref().ok_or(TransportError::NotConnected)?;
        service.list_all_tools().await.map(|_| ()).map_err(|err| TransportError::Rmcp(err.to_string()))
    }

    async fn disconnect(&mut self) {
        if let Some(service) = self.service.take() {
            let _ = service.cancel().await;
        }
    }

    fn transport_kind(&self) -> &'static str {
        "stdio"
    }
}

// ---------------------------------------------------------------------
// Streamable HTTP
// ---------------------------------------------------------------------

/// Streamable-HTTP transport: one POST per JSON-RPC request, via `rmcp`'s
/// reqwest-backed transport, grounded on `client/core.rs::connect_http`.
pub struct StreamableHttpTransport {
    config: ServiceConfig,
    service: Option<RunningService<RoleClient, ()>>,
}

impl StreamableHttpTransport {
    pub fn new(config: ServiceConfig) -> Self {
        Self { config, service: None }
    }

    fn build_http_client(&self) -> Result<reqwest::Client, TransportError> {
        build_authenticated_client(&self.config)
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let url = self.config.url.as_ref().ok_or(TransportError::NotConnected)?;
        let client = self.build_http_client()?;
        let config = rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig::with_uri(url.to_string());
        let transport = rmcp::transport::StreamableHttpClientTransport::with_client(client, config);

        let running = timeout(Duration::from_secs(10), ().serve(transport))
            .await
            .map_err(|_| TransportError::HandshakeTimeout)?
            .map_err(|err| TransportError::Rmcp(err.to_string()))?;

        self.service = Some(running);
        Ok(())
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, TransportError> {
        let service = self.service.as_ref().ok_or(TransportError::NotConnected)?;
        let tools = service.list_all_tools().await.map_err(|err| TransportError::Rmcp(err.to_string()))?;
        Ok(tools.into_iter().map(|tool| tool_descriptor_from_rmcp("", tool)).collect())
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value, TransportError> {
        let service = self.service.as_ref().ok_or(TransportError::NotConnected)?;
        let result = service
            .call_tool(CallToolRequestParams {
                name: name.to_string().into(),
                arguments: Some(value_to_object(arguments)),
                task: None,
                meta: None,
            })
            .await
            .map_err(|err| TransportError::Rmcp(err.to_string()))?;
        serde_json::to_value(result).map_err(|err| TransportError::Rmcp(err.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        let service = self.service.as_ref().ok_or(TransportError::NotConnected)?;
        service.list_all_tools().await.map(|_| ()).map_err(|err| TransportError::Rmcp(err.to_string()))
    }

    async fn disconnect(&mut self) {
        if let Some(service) = self.service.take() {
            let _ = service.cancel().await;
        }
    }

    fn transport_kind(&self) -> &'static str {
        "streamable-http"
    }
}

/// Build a `reqwest::Client` carrying the service's configured headers and,
/// when `apiKey` is set and no explicit `Authorization` header is present,
/// a bearer `Authorization` header (§6.2).
pub fn build_authenticated_client(config: &ServiceConfig) -> Result<reqwest::Client, TransportError> {
    let mut header_map = reqwest::header::HeaderMap::new();
    let mut has_authorization = false;

    if let Some(headers) = &config.headers {
        for header in headers {
            if header.key.eq_ignore_ascii_case("authorization") {
                has_authorization = true;
            }
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(header.key.as_bytes()),
                reqwest::header::HeaderValue::from_str(&header.value),
            ) {
                header_map.insert(name, value);
            }
        }
    }

    if !has_authorization {
        if let Some(api_key) = &config.api_key {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&format!("Bearer {api_key}")) {
                header_map.insert(reqwest::header::AUTHORIZATION, value);
            }
        }
    }

    reqwest::Client::builder().default_headers(header_map).build().map_err(TransportError::Http)
}

fn value_to_object(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

fn tool_descriptor_from_rmcp(service_name: &str, tool: rmcp::model::Tool) -> ToolDescriptor {
    ToolDescriptor {
        original_name: tool.name.to_string(),
        description: tool.description.map(|description| description.to_string()),
        input_schema: serde_json::to_value(&*tool.input_schema).unwrap_or(Value::Null),
        service_name: service_name.to_string(),
        enabled: true,
        stats: Default::default(),
    }
}

// ---------------------------------------------------------------------
// SSE
// ---------------------------------------------------------------------

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

/// SSE transport: a persistent `GET /events` stream carrying JSON-RPC
/// responses, correlated to requests POSTed separately, with capped
/// exponential reconnect backoff. Grounded on the teacher's
/// `client/http/sse.rs`.
pub struct SseTransport {
    config: ServiceConfig,
    client: reqwest::Client,
    pending: PendingMap,
    last_event_id: Arc<Mutex<Option<String>>>,
    listener: Option<tokio::task::JoinHandle<()>>,
    tool_cache: Vec<ToolDescriptor>,
}

impl SseTransport {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            last_event_id: Arc::new(Mutex::new(None)),
            listener: None,
            tool_cache: Vec::new(),
        }
    }

    fn base_url(&self) -> Result<url::Url, TransportError> {
        self.config.url.clone().ok_or(TransportError::NotConnected)
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let request_id = uuid_like_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": method,
            "params": params,
        });

        let response = self.client.post(self.base_url()?).json(&body).send().await.map_err(TransportError::Http)?;
        if !response.status().is_success() {
            self.pending.lock().await.remove(&request_id);
            return Err(TransportError::MalformedFrame(format!("upstream returned status {}", response.status())));
        }

        match tokio::time::timeout(Duration::from_secs(30), rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(TransportError::NotConnected),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(TransportError::HandshakeTimeout)
            }
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let base_url = self.base_url()?;
        let client = self.client.clone();
        let pending = self.pending.clone();
        let last_event_id = self.last_event_id.clone();

        let handle = tokio::spawn(async move {
            spawn_sse_listener(client, base_url, pending, last_event_id).await;
        });
        self.listener = Some(handle);

        let init = self.send_request("initialize", serde_json::json!({})).await;
        init.map(|_| ())
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, TransportError> {
        let response = self.send_request("tools/list", serde_json::json!({})).await?;
        let tools = response
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| {
                Some(ToolDescriptor {
                    original_name: entry.get("name")?.as_str()?.to_string(),
                    description: entry.get("description").and_then(Value::as_str).map(str::to_string),
                    input_schema: entry.get("inputSchema").cloned().unwrap_or(Value::Null),
                    service_name: String::new(),
                    enabled: true,
                    stats: Default::default(),
                })
            })
            .collect::<Vec<_>>();
        self.tool_cache = tools.clone();
        Ok(tools)
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value, TransportError> {
        self.send_request("tools/call", serde_json::json!({"name": name, "arguments": arguments})).await
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.send_request("ping", serde_json::json!({})).await.map(|_| ())
    }

    async fn disconnect(&mut self) {
        if let Some(handle) = self.listener.take() {
            handle.abort();
        }
    }

    fn transport_kind(&self) -> &'static str {
        "sse"
    }
}

/// Background SSE reader: reconnects with capped exponential backoff,
/// parses `data:`/`id:`/`event:` frames, and resolves pending requests by
/// correlating the frame's JSON-RPC `id` (or, failing that, the SSE
/// `last_event_id`) back to the waiting caller.
async fn spawn_sse_listener(client: reqwest::Client, base_url: url::Url, pending: PendingMap, last_event_id: Arc<Mutex<Option<String>>>) {
    let mut backoff_ms: u64 = 500;
    const MAX_BACKOFF_MS: u64 = 10_000;

    loop {
        let mut request = client.get(base_url.clone()).header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(id) = last_event_id.lock().await.clone() {
            request = request.header("Last-Event-ID", id);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                backoff_ms = 500;
                if let Err(error) = process_sse_stream(response, &pending, &last_event_id).await {
                    tracing::debug!(%error, "sse stream ended");
                }
            }
            Ok(response) => {
                tracing::debug!(status = %response.status(), "sse connect rejected");
            }
            Err(error) => {
                tracing::debug!(%error, "sse connect failed");
            }
        }

        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}

async fn process_sse_stream(response: reqwest::Response, pending: &PendingMap, last_event_id: &Arc<Mutex<Option<String>>>) -> Result<(), TransportError> {
    use futures_util::StreamExt;

    let mut buffer = bytes::BytesMut::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(TransportError::Http)?;
        buffer.extend_from_slice(&chunk);

        while let Some((frame, consumed)) = find_frame(&buffer) {
            handle_sse_frame(&frame, pending, last_event_id).await;
            let _ = buffer.split_to(consumed);
        }
    }

    Ok(())
}

fn find_frame(buffer: &bytes::BytesMut) -> Option<(Vec<u8>, usize)> {
    let data = buffer.as_ref();
    for (separator, separator_len) in [(b"\r\n\r\n".as_slice(), 4usize), (b"\n\n".as_slice(), 2usize)] {
        if let Some(position) = data.windows(separator.len()).position(|window| window == separator) {
            return Some((data[..position].to_vec(), position + separator_len));
        }
    }
    None
}

async fn handle_sse_frame(frame: &[u8], pending: &PendingMap, last_event_id: &Arc<Mutex<Option<String>>>) {
    let text = String::from_utf8_lossy(frame);
    let mut data_lines = Vec::new();
    let mut frame_id: Option<String> = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        } else if let Some(rest) = line.strip_prefix("id:") {
            frame_id = Some(rest.trim().to_string());
        }
    }

    if data_lines.is_empty() {
        return;
    }

    let data = data_lines.join("\n");
    let Ok(payload) = serde_json::from_str::<Value>(&data) else {
        return;
    };

    if let Some(id) = frame_id.clone() {
        *last_event_id.lock().await = Some(id);
    }

    let correlation_id = payload
        .get("id")
        .and_then(|id| id.as_str().map(str::to_string).or_else(|| id.as_i64().map(|n| n.to_string())))
        .or(frame_id);

    if let Some(correlation_id) = correlation_id {
        if let Some(sender) = pending.lock().await.remove(&correlation_id) {
            let _ = sender.send(payload);
        }
    }
}

fn uuid_like_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|duration| duration.as_nanos()).unwrap_or(0);
    format!("req-{nanos:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_frame_supports_both_line_endings() {
        let mut buffer = bytes::BytesMut::new();
        buffer.extend_from_slice(b"data: {\"id\":\"1\"}\n\nrest");
        let (frame, consumed) = find_frame(&buffer).unwrap();
        assert_eq!(String::from_utf8_lossy(&frame), "data: {\"id\":\"1\"}");
        assert_eq!(consumed, buffer.len() - 4);
    }

    #[test]
    fn value_to_object_wraps_non_object_values() {
        let wrapped = value_to_object(Value::Bool(true));
        assert_eq!(wrapped.get("value"), Some(&Value::Bool(true)));
    }
}
