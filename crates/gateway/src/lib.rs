//! Aggregating MCP gateway: multiplexes upstream MCP servers and
//! in-process custom tools behind one namespaced MCP surface exposed to
//! downstream endpoints over JSON-RPC.

pub mod cache;
pub mod config;
pub mod custom_tool;
pub mod endpoint_manager;
pub mod error;
pub mod event_bus;
pub mod logging;
pub mod manager;
pub mod proxy;
pub mod service;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub use config::{GatewayConfig, ServiceConfig};
pub use endpoint_manager::{EndpointManager, EndpointStatus};
pub use error::GatewayError;
pub use event_bus::{EventBus, GatewayEvent};
pub use manager::ServiceManager;

use cache::CacheManager;
use custom_tool::{CustomToolRegistry, FunctionRegistry, PlatformRegistry};
use logging::AuditLogger;
use manager::ToolSync;

/// Top-level handle assembling every gateway subsystem from one
/// configuration document (§4/§5 ownership model): `ServiceManager` owns
/// upstream services, `EndpointManager` owns downstream proxies holding
/// only a non-owning reference back to `ServiceManager`, and
/// `CustomToolRegistry`/`CacheManager` are shared by value across both.
pub struct Gateway {
    pub services: Arc<ServiceManager>,
    pub custom_tools: Arc<CustomToolRegistry>,
    pub cache: Arc<CacheManager>,
    pub endpoints: Arc<EndpointManager>,
    pub audit: Arc<AuditLogger>,
    pub events: EventBus,
    custom_tool_configs: Arc<RwLock<Vec<types::tool::CustomToolConfig>>>,
    tool_sync: Arc<ToolSync>,
    tool_sync_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Where the gateway persists its cache, tool-call history, and audit log.
pub struct StatePaths {
    pub cache_path: PathBuf,
    pub audit_path: PathBuf,
}

impl StatePaths {
    pub fn under(state_dir: &std::path::Path) -> Self {
        Self {
            cache_path: state_dir.join("mcp-cache.json"),
            audit_path: state_dir.join("audit.jsonl"),
        }
    }
}

impl Gateway {
    /// Assemble every subsystem from a loaded configuration document. The
    /// function-kind custom tool registry is built by the caller up front
    /// (it has no runtime loader, see [`FunctionRegistry`]) and handed in
    /// already populated. Does not connect anything yet; call
    /// [`Gateway::start`] to autostart upstream services and bring
    /// endpoints up.
    pub fn new(config: GatewayConfig, state: StatePaths, functions: FunctionRegistry) -> Self {
        let events = EventBus::default();
        let audit = Arc::new(AuditLogger::new(state.audit_path));
        let services = Arc::new(ServiceManager::new(config.clone(), events.clone(), Arc::clone(&audit)));
        let cache = Arc::new(CacheManager::new(state.cache_path));
        let platforms = Arc::new(PlatformRegistry::new());
        let custom_tools = Arc::new(CustomToolRegistry::new(Arc::new(functions), platforms, Arc::clone(&services), Arc::clone(&cache), Arc::clone(&audit)));
        let endpoints = Arc::new(EndpointManager::new(Arc::clone(&services), Arc::clone(&custom_tools), events.clone()));

        let custom_tool_configs = Arc::new(RwLock::new(config.custom_mcp.tools.clone()));
        let tool_sync = Arc::new(ToolSync::new(Arc::clone(&cache), Arc::clone(&custom_tools), Arc::clone(&custom_tool_configs), events.clone()));

        Self {
            services,
            custom_tools,
            cache,
            endpoints,
            audit,
            events,
            custom_tool_configs,
            tool_sync,
            tool_sync_handle: std::sync::Mutex::new(None),
        }
    }

    /// Load persisted cache state, reload the custom tool registry, spawn
    /// the cache cleanup loop, autostart every non-disabled upstream
    /// service, and bring up every configured downstream endpoint.
    pub async fn start(&self, config: &GatewayConfig) -> Result<(), GatewayError> {
        self.cache.load().await?;
        Arc::clone(&self.cache).spawn_cleanup_loop();

        *self.custom_tool_configs.write().await = config.custom_mcp.tools.clone();
        self.custom_tools.reload(config.custom_mcp.tools.clone()).await;
        *self.tool_sync_handle.lock().unwrap() = Some(Arc::clone(&self.tool_sync).spawn());

        self.services.start().await;

        self.endpoints.initialize(config).await;
        self.endpoints.connect().await;

        Ok(())
    }

    /// Graceful shutdown, per the ordering in the concurrency model:
    /// endpoints down, then services down, then the cache is already
    /// flushed on every write so nothing further is needed there.
    pub async fn shutdown(&self) {
        self.endpoints.cleanup().await;
        self.services.stop_all().await;
        if let Some(handle) = self.tool_sync_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}
