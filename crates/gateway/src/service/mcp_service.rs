//! `MCPService`: one upstream MCP server's connection lifecycle (§4.2).
//!
//! Owns a single [`Transport`], drives the `ServiceState` FSM, runs the
//! ping loop, and schedules reconnects through [`backoff`]. Grounded on the
//! teacher's `client/core.rs` (connect/call/health update flow) and
//! `client/gateway.rs` (the `starting`/reconnect bookkeeping pattern).

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};

use crate::config::{PingPolicy, ReconnectPolicy, ServiceConfig};
use crate::error::{GatewayError, TransportError};
use crate::event_bus::{EventBus, GatewayEvent};
use crate::service::backoff;
use crate::service::transport::{build_transport, Transport};
use crate::types::service::{ServiceHealth, ServiceState};
use crate::types::tool::ToolDescriptor;

/// A running upstream MCP server connection, shared across the
/// `ServiceManager`'s dispatch path and its own background tasks.
pub struct MCPService {
    pub name: String,
    config: ServiceConfig,
    transport: Mutex<Option<Box<dyn Transport>>>,
    state: RwLock<ServiceState>,
    health: RwLock<ServiceHealth>,
    tools: RwLock<Vec<ToolDescriptor>>,
    events: EventBus,
    reconnect_attempt: Mutex<u32>,
    shutdown: watch::Sender<bool>,
}

impl MCPService {
    pub fn new(name: String, config: ServiceConfig, events: EventBus) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            name,
            config,
            transport: Mutex::new(None),
            state: RwLock::new(ServiceState::Disconnected),
            health: RwLock::new(ServiceHealth::default()),
            tools: RwLock::new(Vec::new()),
            events,
            reconnect_attempt: Mutex::new(0),
            shutdown,
        }
    }

    /// Stop any background reconnect loop this service may have spawned for
    /// itself. Idempotent; safe to call even if no loop is running.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub async fn state(&self) -> ServiceState {
        *self.state.read().await
    }

    pub async fn health(&self) -> ServiceHealth {
        self.health.read().await.clone()
    }

    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().await.clone()
    }

    async fn set_state(&self, new_state: ServiceState) {
        *self.state.write().await = new_state;
    }

    /// Connect to the upstream server. On failure, rather than landing in
    /// `Failed` directly, hands off to a self-owned background reconnect
    /// loop (`begin_reconnect`) so the service keeps retrying with backoff
    /// per §4.2's FSM; the caller still sees the first attempt's error.
    pub async fn connect(self: &Arc<Self>) -> Result<(), GatewayError> {
        let result = self.attempt_connect().await;
        if matches!(result, Err(GatewayError::Transport(_))) {
            let this = Arc::clone(self);
            let reconnect_policy = self.config.reconnect.clone().unwrap_or_default();
            let mut shutdown_rx = self.shutdown.subscribe();
            tokio::spawn(async move {
                this.begin_reconnect(reconnect_policy, &mut shutdown_rx).await;
            });
        }
        result
    }

    /// One connect attempt: handshake plus an initial tool sync. Rejects
    /// re-entrant connects while `Connecting`. Used both by the public
    /// `connect()` entrypoint and by `begin_reconnect`'s own retry loop
    /// (which must not re-trigger another background reconnect spawn).
    async fn attempt_connect(&self) -> Result<(), GatewayError> {
        {
            let current = self.state().await;
            if current == ServiceState::Connecting {
                return Err(GatewayError::AlreadyConnecting(self.name.clone()));
            }
        }

        self.set_state(ServiceState::Connecting).await;
        let start = Instant::now();

        let mut transport = build_transport(&self.name, &self.config).map_err(GatewayError::Transport)?;
        let connect_result = transport.connect().await;

        match connect_result {
            Ok(()) => {
                let handshake_latency_ms = start.elapsed().as_millis() as u64;
                let discovered_tools = match transport.list_tools().await {
                    Ok(tools) => tools
                        .into_iter()
                        .map(|mut tool| {
                            tool.service_name = self.name.clone();
                            tool
                        })
                        .collect(),
                    Err(error) => {
                        tracing::warn!(service = self.name.as_str(), %error, "initial tool sync failed");
                        Vec::new()
                    }
                };

                let tools = Arc::new(discovered_tools);
                *self.tools.write().await = (*tools).clone();
                *self.transport.lock().await = Some(transport);
                self.set_state(ServiceState::Connected).await;
                self.health.write().await.mark_healthy(Some(handshake_latency_ms));
                let attempt = {
                    let mut guard = self.reconnect_attempt.lock().await;
                    let previous = *guard;
                    *guard = 0;
                    previous
                };

                self.events.publish(GatewayEvent::ServiceConnected {
                    service_name: self.name.clone(),
                    tools,
                    at: Instant::now(),
                });
                if attempt > 0 {
                    self.events.publish(GatewayEvent::RestartCompleted { service_name: self.name.clone() });
                }
                Ok(())
            }
            Err(error) => {
                self.set_state(ServiceState::Reconnecting).await;
                self.health.write().await.mark_unhealthy(error.to_string());
                let attempt = *self.reconnect_attempt.lock().await;
                self.events.publish(GatewayEvent::ServiceConnectionFailed {
                    service_name: self.name.clone(),
                    error: error.to_string(),
                    attempt,
                });
                Err(GatewayError::Transport(error))
            }
        }
    }

    pub async fn disconnect(&self) {
        if let Some(mut transport) = self.transport.lock().await.take() {
            transport.disconnect().await;
        }
        self.set_state(ServiceState::Disconnected).await;
        self.health.write().await.mark_disconnected();
        self.events.publish(GatewayEvent::ServiceDisconnected {
            service_name: self.name.clone(),
            reason: "disconnect requested".to_string(),
            at: Instant::now(),
        });
    }

    /// Re-sync the tool list from the upstream server, replacing the
    /// previous snapshot in place.
    pub async fn refresh_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError> {
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or_else(|| GatewayError::ServiceNotConnected(self.name.clone()))?;
        let tools: Vec<ToolDescriptor> = transport
            .list_tools()
            .await
            .map_err(GatewayError::Transport)?
            .into_iter()
            .map(|mut tool| {
                tool.service_name = self.name.clone();
                tool
            })
            .collect();
        *self.tools.write().await = tools.clone();
        Ok(tools)
    }

    /// Invoke a tool by its original (un-namespaced) name. Only permitted
    /// while `Connected`.
    pub async fn call_tool(&self, original_name: &str, arguments: Value) -> Result<Value, GatewayError> {
        if self.state().await != ServiceState::Connected {
            return Err(GatewayError::ServiceNotConnected(self.name.clone()));
        }

        let timeout_ms = self.config.timeout_ms.unwrap_or(30_000);
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or_else(|| GatewayError::ServiceNotConnected(self.name.clone()))?;

        match tokio::time::timeout(Duration::from_millis(timeout_ms), transport.call_tool(original_name, arguments)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(GatewayError::Upstream(error.to_string())),
            Err(_) => Err(GatewayError::ToolTimeout(Duration::from_millis(timeout_ms))),
        }
    }

    /// One ping attempt, used by the gateway's background ping loop.
    /// Transitions to `Reconnecting` on failure rather than failing calls
    /// outright, so in-flight `call_tool` invocations are unaffected until
    /// the next dispatch.
    async fn ping_once(&self) -> Result<(), TransportError> {
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(TransportError::NotConnected)?;
        transport.ping().await
    }

    /// Drive the ping + reconnect loop for this service until `shutdown`
    /// resolves. Intended to be spawned once per service for its lifetime.
    pub async fn run_ping_loop(self: Arc<Self>, ping_policy: PingPolicy, reconnect_policy: ReconnectPolicy, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if !ping_policy.enabled {
            return;
        }

        let mut consecutive_failures = 0u32;
        let mut interval = tokio::time::interval(Duration::from_millis(ping_policy.interval_ms));

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
            }

            if self.state().await != ServiceState::Connected {
                continue;
            }

            match self.ping_once().await {
                Ok(()) => consecutive_failures = 0,
                Err(error) => {
                    consecutive_failures += 1;
                    tracing::warn!(service = self.name.as_str(), %error, consecutive_failures, "ping failed");
                    if consecutive_failures >= ping_policy.failure_threshold {
                        self.begin_reconnect(reconnect_policy.clone(), &mut shutdown).await;
                        consecutive_failures = 0;
                    }
                }
            }
        }
    }

    async fn begin_reconnect(&self, policy: ReconnectPolicy, shutdown: &mut tokio::sync::watch::Receiver<bool>) {
        self.set_state(ServiceState::Reconnecting).await;
        if let Some(mut transport) = self.transport.lock().await.take() {
            transport.disconnect().await;
        }

        loop {
            let attempt = {
                let mut guard = self.reconnect_attempt.lock().await;
                *guard += 1;
                *guard
            };

            if backoff::attempts_exhausted(&policy, attempt) {
                self.set_state(ServiceState::Failed).await;
                self.health.write().await.mark_unhealthy("reconnect attempts exhausted".to_string());
                return;
            }

            let delay = backoff::compute_delay(&policy, attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }

            if self.attempt_connect().await.is_ok() {
                return;
            }
        }
    }
}
