//! `ServiceManager`: the registry of upstream services and the tool-name
//! index that namespaces their tools for downstream endpoints (§4.3).
//!
//! Grounded on the teacher's `client/gateway.rs`: the `starting`/`stopping`
//! reservation sets that prevent duplicate concurrent connects, autostart
//! scheduled onto the runtime rather than blocking `start()`, and a
//! broadcast of lifecycle events alongside the audit log.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::cache::CacheManager;
use crate::config::{GatewayConfig, ServiceConfig};
use crate::custom_tool::CustomToolRegistry;
use crate::error::GatewayError;
use crate::event_bus::{ConfigScope, EventBus, GatewayEvent};
use crate::logging::audit::{AuditEntry, AuditLogger};
use crate::service::MCPService;
use crate::types::service::{ServiceHealth, ServiceState};
use crate::types::tool::{exposed_tool_name, split_exposed_tool_name, CustomToolConfig, ToolDescriptor};

/// Owns every configured upstream service and the name index that maps a
/// namespaced exposed tool name back to its `(service, original_name)` pair.
pub struct ServiceManager {
    services: Mutex<HashMap<String, Arc<MCPService>>>,
    starting: Mutex<HashSet<String>>,
    config: RwLock<GatewayConfig>,
    events: EventBus,
    audit: Arc<AuditLogger>,
    ping_tasks: Mutex<HashMap<String, (JoinHandle<()>, watch::Sender<bool>)>>,
}

impl ServiceManager {
    pub fn new(config: GatewayConfig, events: EventBus, audit: Arc<AuditLogger>) -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            starting: Mutex::new(HashSet::new()),
            config: RwLock::new(config),
            events,
            audit,
            ping_tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Autostart every non-disabled configured service. Each connect attempt
    /// is spawned independently so one slow/failing handshake never blocks
    /// the others (§4.3/§5).
    pub async fn start(self: &Arc<Self>) {
        let snapshot: Vec<(String, ServiceConfig)> = {
            let config = self.config.read().await;
            config.mcp_servers.iter().filter(|(_, service)| !service.is_disabled()).map(|(name, service)| (name.clone(), service.clone())).collect()
        };

        for (name, _) in snapshot {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(error) = manager.start_service(&name).await {
                    tracing::warn!(service = name.as_str(), %error, "autostart failed");
                }
            });
        }
    }

    /// Stop every running service and abort their ping loops.
    pub async fn stop_all(&self) {
        let names: Vec<String> = self.services.lock().await.keys().cloned().collect();
        for name in names {
            let _ = self.stop_service(&name).await;
        }
    }

    /// Connect a configured service by name, reserving it against
    /// concurrent duplicate starts.
    pub async fn start_service(self: &Arc<Self>, name: &str) -> Result<(), GatewayError> {
        let service_config = {
            let config = self.config.read().await;
            config.mcp_servers.get(name).cloned().ok_or_else(|| GatewayError::ToolNotFound(name.to_string()))?
        };

        if service_config.is_disabled() {
            return Err(GatewayError::NotSupported(format!("service '{name}' is disabled")));
        }

        {
            let services = self.services.lock().await;
            if services.contains_key(name) {
                return Err(GatewayError::AlreadyConnecting(name.to_string()));
            }
        }
        {
            let mut starting = self.starting.lock().await;
            if !starting.insert(name.to_string()) {
                return Err(GatewayError::AlreadyConnecting(name.to_string()));
            }
        }

        let service = Arc::new(MCPService::new(name.to_string(), service_config.clone(), self.events.clone()));
        // Register before attempting the handshake: a service that fails its
        // first connect still lands in Reconnecting/Failed per the FSM and
        // must stay visible to service_state()/stop_service(), not vanish.
        self.services.lock().await.insert(name.to_string(), Arc::clone(&service));

        let connect_result = service.connect().await;

        self.starting.lock().await.remove(name);

        match connect_result {
            Ok(()) => {
                self.spawn_ping_loop(name.to_string(), Arc::clone(&service), &service_config).await;
                self.audit.log(AuditEntry::service_started(name.to_string())).await;
                Ok(())
            }
            Err(error) => {
                self.audit.log(AuditEntry::service_start_failed(name.to_string(), error.to_string())).await;
                Err(error)
            }
        }
    }

    async fn spawn_ping_loop(&self, name: String, service: Arc<MCPService>, config: &ServiceConfig) {
        let ping_policy = config.ping.clone().unwrap_or_default();
        let reconnect_policy = config.reconnect.clone().unwrap_or_default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            service.run_ping_loop(ping_policy, reconnect_policy, shutdown_rx).await;
        });

        self.ping_tasks.lock().await.insert(name, (handle, shutdown_tx));
    }

    /// Disconnect and deregister a running service.
    pub async fn stop_service(&self, name: &str) -> Result<(), GatewayError> {
        let service = self.services.lock().await.remove(name);
        if let Some((handle, shutdown_tx)) = self.ping_tasks.lock().await.remove(name) {
            let _ = shutdown_tx.send(true);
            handle.abort();
        }
        if let Some(service) = service {
            service.request_shutdown();
            service.disconnect().await;
            self.audit.log(AuditEntry::service_stopped(name.to_string())).await;
        }
        Ok(())
    }

    pub async fn restart_service(self: &Arc<Self>, name: &str) -> Result<(), GatewayError> {
        self.events.publish(GatewayEvent::RestartRequested {
            service_name: name.to_string(),
            reason: "manual restart".to_string(),
        });
        self.stop_service(name).await?;
        self.start_service(name).await
    }

    pub async fn service_state(&self, name: &str) -> ServiceState {
        match self.services.lock().await.get(name) {
            Some(service) => service.state().await,
            None => ServiceState::Disconnected,
        }
    }

    pub async fn service_health(&self, name: &str) -> Option<ServiceHealth> {
        let services = self.services.lock().await;
        let service = services.get(name)?;
        Some(service.health().await)
    }

    pub async fn list_service_names(&self) -> Vec<String> {
        self.services.lock().await.keys().cloned().collect()
    }

    /// The full aggregated, namespaced tool index across every connected
    /// service (§4.3 tool namespacing).
    pub async fn list_exposed_tools(&self) -> Vec<ToolDescriptor> {
        let services: Vec<Arc<MCPService>> = self.services.lock().await.values().cloned().collect();
        let mut tools = Vec::new();
        for service in services {
            tools.extend(service.tools().await);
        }
        tools
    }

    /// Re-sync one service's tool list and publish a `ServerTools`-scoped
    /// config-changed style event to interested subscribers.
    pub async fn refresh_service_tools(&self, name: &str) -> Result<Vec<ToolDescriptor>, GatewayError> {
        let service = {
            let services = self.services.lock().await;
            services.get(name).cloned().ok_or_else(|| GatewayError::ServiceNotConnected(name.to_string()))?
        };
        let tools = service.refresh_tools().await?;
        self.events.publish(GatewayEvent::ConfigUpdated {
            scope: ConfigScope::ServerTools { service_name: name.to_string() },
            at: std::time::Instant::now(),
        });
        Ok(tools)
    }

    /// Dispatch a call against an exposed (namespaced) tool name, splitting
    /// it back into its owning service and original tool name.
    pub async fn call_exposed_tool(&self, exposed_name: &str, arguments: Value) -> Result<Value, GatewayError> {
        let (service_name, original_name) = split_exposed_tool_name(exposed_name).ok_or_else(|| GatewayError::ToolNotFound(exposed_name.to_string()))?;

        let service = {
            let services = self.services.lock().await;
            services.get(service_name).cloned().ok_or_else(|| GatewayError::ServiceNotConnected(service_name.to_string()))?
        };

        service.call_tool(original_name, arguments).await
    }

    /// Build the exposed name this manager would assign a tool under `service_name`.
    pub fn exposed_name_for(service_name: &str, original_name: &str) -> String {
        exposed_tool_name(service_name, original_name)
    }

    pub async fn update_config(&self, config: GatewayConfig) {
        *self.config.write().await = config;
        self.events.publish(GatewayEvent::ConfigUpdated {
            scope: crate::event_bus::ConfigScope::Full,
            at: std::time::Instant::now(),
        });
    }
}

/// Reacts to a service finishing its handshake by writing its tool list into
/// the cache's `mcpServers` section and republishing two narrower
/// `config:updated` events so the custom-tool registry and anything else
/// watching the bus can react without re-reading the whole configuration
/// document (§4.3 `ToolSync`).
pub struct ToolSync {
    cache: Arc<CacheManager>,
    custom_tools: Arc<CustomToolRegistry>,
    custom_tool_configs: Arc<RwLock<Vec<CustomToolConfig>>>,
    events: EventBus,
    sync_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ToolSync {
    pub fn new(cache: Arc<CacheManager>, custom_tools: Arc<CustomToolRegistry>, custom_tool_configs: Arc<RwLock<Vec<CustomToolConfig>>>, events: EventBus) -> Self {
        Self {
            cache,
            custom_tools,
            custom_tool_configs,
            events,
            sync_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the event bus and react to every `ServiceConnected` for
    /// as long as the returned task is left running.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut receiver = self.events.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                if let GatewayEvent::ServiceConnected { service_name, tools, at } = event {
                    self.sync_service(&service_name, tools, at).await;
                }
            }
        })
    }

    /// Run one sync pass for `service_name`. At most one sync per service
    /// runs at a time (Testable Property #3): an overlapping
    /// `ServiceConnected` for the same service (a rapid reconnect cycle)
    /// is dropped rather than queued, since only the latest tool list
    /// matters and the next `ServiceConnected` will sync it anyway.
    async fn sync_service(&self, service_name: &str, tools: Arc<Vec<ToolDescriptor>>, at: Instant) {
        let lock = {
            let mut locks = self.sync_locks.lock().await;
            Arc::clone(locks.entry(service_name.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!(service = service_name, "tool sync already in flight, dropping");
                return;
            }
        };

        self.cache.put_service_tools(service_name.to_string(), (*tools).clone()).await;
        self.events.publish(GatewayEvent::ConfigUpdated {
            scope: ConfigScope::ServerTools { service_name: service_name.to_string() },
            at,
        });
        self.events.publish(GatewayEvent::ConfigUpdated { scope: ConfigScope::CustomMcp, at });

        let configs = self.custom_tool_configs.read().await.clone();
        self.custom_tools.reload(configs).await;
    }
}

#[cfg(test)]
mod tool_sync_tests {
    use super::*;
    use crate::custom_tool::{FunctionRegistry, PlatformRegistry};
    use crate::logging::audit::AuditLogger;

    #[tokio::test]
    async fn service_connected_writes_tools_and_publishes_scoped_updates() {
        let dir = tempfile::tempdir().unwrap();
        let events = EventBus::default();
        let cache = Arc::new(CacheManager::new(dir.path().join("mcp-cache.json")));
        let services = Arc::new(ServiceManager::new(GatewayConfig::default(), events.clone(), Arc::new(AuditLogger::disabled())));
        let custom_tools = Arc::new(CustomToolRegistry::new(
            Arc::new(FunctionRegistry::new()),
            Arc::new(PlatformRegistry::new()),
            Arc::clone(&services),
            Arc::clone(&cache),
            Arc::new(AuditLogger::disabled()),
        ));
        let sync = Arc::new(ToolSync::new(Arc::clone(&cache), custom_tools, Arc::new(RwLock::new(Vec::new())), events.clone()));
        let _handle = Arc::clone(&sync).spawn();

        let mut scoped = events.subscribe();
        events.publish(GatewayEvent::ServiceConnected {
            service_name: "calc".to_string(),
            tools: Arc::new(vec![]),
            at: Instant::now(),
        });

        // `scoped` also observes our own `ServiceConnected` publish above;
        // skip it and wait for the two updates `ToolSync` derives from it.
        let first = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            loop {
                let event = scoped.recv().await.unwrap();
                if matches!(event, GatewayEvent::ConfigUpdated { .. }) {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(first, GatewayEvent::ConfigUpdated { scope: ConfigScope::ServerTools { service_name }, .. } if service_name == "calc"));

        let second = tokio::time::timeout(std::time::Duration::from_secs(1), scoped.recv()).await.unwrap().unwrap();
        assert!(matches!(second, GatewayEvent::ConfigUpdated { scope: ConfigScope::CustomMcp, .. }));

        for _ in 0..20 {
            if cache.service_tools("calc").await.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(cache.service_tools("calc").await.is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_service_rejects_unknown_name() {
        let manager = Arc::new(ServiceManager::new(GatewayConfig::default(), EventBus::default(), Arc::new(AuditLogger::disabled())));
        let result = manager.start_service("missing").await;
        assert!(matches!(result, Err(GatewayError::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn stop_service_on_unregistered_name_is_a_no_op() {
        let manager = Arc::new(ServiceManager::new(GatewayConfig::default(), EventBus::default(), Arc::new(AuditLogger::disabled())));
        assert!(manager.stop_service("missing").await.is_ok());
    }

    #[test]
    fn exposed_name_for_matches_tool_namespacing_rule() {
        assert_eq!(ServiceManager::exposed_name_for("my-service", "add"), "my_service_xzcli_add");
    }
}
