//! `EndpointManager`: owns one `ProxyServer` per configured downstream
//! endpoint (§4.6). Holds only a non-owning `Arc` handle to
//! `ServiceManager` — `ServiceManager` never references this type back,
//! it only publishes events this manager's proxies subscribe to.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::config::GatewayConfig;
use crate::custom_tool::CustomToolRegistry;
use crate::error::GatewayError;
use crate::event_bus::EventBus;
use crate::manager::ServiceManager;
use crate::proxy::{ProxyServer, ProxyState};

struct RunningEndpoint {
    server: Arc<ProxyServer>,
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    initialized: bool,
}

/// Per-endpoint connection status snapshot, per `getConnectionStatus()`.
#[derive(Debug, Clone)]
pub struct EndpointStatus {
    pub endpoint: String,
    pub connected: bool,
    pub initialized: bool,
}

pub struct EndpointManager {
    endpoints: RwLock<HashMap<String, RunningEndpoint>>,
    services: Arc<ServiceManager>,
    custom_tools: Arc<CustomToolRegistry>,
    events: EventBus,
}

impl EndpointManager {
    pub fn new(services: Arc<ServiceManager>, custom_tools: Arc<CustomToolRegistry>, events: EventBus) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            services,
            custom_tools,
            events,
        }
    }

    /// Build a `ProxyServer` for every non-placeholder configured endpoint URL.
    pub async fn initialize(&self, config: &GatewayConfig) {
        let urls = resolve_endpoint_urls(config);
        let mut endpoints = self.endpoints.write().await;
        for url in urls {
            if endpoints.contains_key(&url) {
                continue;
            }
            let server = Arc::new(ProxyServer::new(url.clone(), vec![], Arc::clone(&self.services), Arc::clone(&self.custom_tools), self.events.clone()));
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let task_server = Arc::clone(&server);
            let handle = tokio::spawn(async move {
                task_server.run(shutdown_rx).await;
            });
            endpoints.insert(
                url,
                RunningEndpoint {
                    server,
                    handle,
                    shutdown: shutdown_tx,
                    initialized: true,
                },
            );
        }
    }

    /// Connect (or reconnect) every configured endpoint's proxy.
    pub async fn connect(&self) {
        let endpoints = self.endpoints.read().await;
        for running in endpoints.values() {
            let _ = running.shutdown.send(false);
        }
    }

    /// Disconnect every endpoint's proxy without tearing down its task.
    pub async fn disconnect(&self) {
        let endpoints = self.endpoints.read().await;
        for running in endpoints.values() {
            let _ = running.shutdown.send(true);
        }
    }

    /// Connect a single endpoint by URL.
    pub async fn connect_endpoint(&self, endpoint: &str) -> Result<(), GatewayError> {
        let endpoints = self.endpoints.read().await;
        let running = endpoints.get(endpoint).ok_or_else(|| GatewayError::NotSupported(format!("endpoint '{endpoint}' is not configured")))?;
        let _ = running.shutdown.send(false);
        Ok(())
    }

    /// Disconnect a single endpoint by URL.
    pub async fn disconnect_endpoint(&self, endpoint: &str) -> Result<(), GatewayError> {
        let endpoints = self.endpoints.read().await;
        let running = endpoints.get(endpoint).ok_or_else(|| GatewayError::NotSupported(format!("endpoint '{endpoint}' is not configured")))?;
        let _ = running.shutdown.send(true);
        Ok(())
    }

    pub async fn get_endpoint(&self, endpoint: &str) -> Option<Arc<ProxyServer>> {
        self.endpoints.read().await.get(endpoint).map(|running| Arc::clone(&running.server))
    }

    pub async fn get_connection_status(&self) -> Vec<EndpointStatus> {
        let endpoints = self.endpoints.read().await;
        let mut statuses = Vec::with_capacity(endpoints.len());
        for (endpoint, running) in endpoints.iter() {
            statuses.push(EndpointStatus {
                endpoint: endpoint.clone(),
                connected: matches!(running.server.state().await, ProxyState::Connected),
                initialized: running.initialized,
            });
        }
        statuses
    }

    /// Disconnect every proxy and abort its task. Part of the graceful
    /// shutdown sequence: `cleanup() -> ServiceManager.stop_all() -> cache flush`.
    pub async fn cleanup(&self) {
        let mut endpoints = self.endpoints.write().await;
        for (_, running) in endpoints.drain() {
            let _ = running.shutdown.send(true);
            running.handle.abort();
        }
    }

    /// Dynamic endpoint addition/removal at runtime is not supported (§4.6).
    pub fn add_endpoint(&self, _url: String) -> Result<(), GatewayError> {
        Err(GatewayError::NotSupported("adding endpoints at runtime is not supported".to_string()))
    }

    pub fn remove_endpoint(&self, _url: &str) -> Result<(), GatewayError> {
        Err(GatewayError::NotSupported("removing endpoints at runtime is not supported".to_string()))
    }
}

/// Prefer `mcpEndpoints`; fall back to the legacy single `mcpEndpoint` field.
/// Placeholder entries (`<...>`) and blanks are filtered out with a warning.
fn resolve_endpoint_urls(config: &GatewayConfig) -> Vec<String> {
    let mut urls: Vec<String> = config
        .mcp_endpoints
        .iter()
        .filter(|url| {
            let is_placeholder = url.trim().is_empty() || (url.starts_with('<') && url.ends_with('>'));
            if is_placeholder {
                tracing::warn!(url = url.as_str(), "ignoring placeholder endpoint URL");
            }
            !is_placeholder
        })
        .cloned()
        .collect();

    if urls.is_empty() {
        if let Some(legacy) = &config.mcp_endpoint {
            if !legacy.trim().is_empty() {
                urls.push(legacy.clone());
            }
        }
    }

    urls
}
