//! On-disk one-shot result cache (§3/§4.7), persisted as a single JSON
//! document and written atomically (write-to-temp, then rename), grounded
//! on the teacher's `server/workflow/services/storage.rs::write_atomic`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::CacheError;
use crate::types::cache::{CacheEntry, CacheEntryStatus, CacheMetadata, ServiceToolsSnapshot};
use crate::types::tool::ToolDescriptor;

const DEFAULT_TTL_MS: u64 = 10 * 60 * 1_000;
const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
const CACHE_DOCUMENT_VERSION: u32 = 1;

/// The on-disk shape of `<configDir>/mcp-cache.json` (§4.7): the one-shot
/// result cache (`customMCPResults`) alongside each connected service's
/// last-synced tool list (`mcpServers`) and bookkeeping metadata.
#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    #[serde(rename = "mcpServers", default)]
    mcp_servers: HashMap<String, ServiceToolsSnapshot>,
    #[serde(rename = "customMCPResults", default)]
    custom_mcp_results: HashMap<String, CacheEntry>,
    #[serde(default)]
    metadata: CacheMetadata,
}

/// Manages the gateway's persisted cache document (§6.5 `<configDir>/mcp-cache.json`).
pub struct CacheManager {
    path: PathBuf,
    entries: RwLock<HashMap<String, CacheEntry>>,
    mcp_servers: RwLock<HashMap<String, ServiceToolsSnapshot>>,
    metadata: RwLock<CacheMetadata>,
    default_ttl_ms: u64,
}

impl CacheManager {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: RwLock::new(HashMap::new()),
            mcp_servers: RwLock::new(HashMap::new()),
            metadata: RwLock::new(CacheMetadata::new()),
            default_ttl_ms: DEFAULT_TTL_MS,
        }
    }

    /// Load a persisted document from disk, tolerating a missing or malformed file.
    pub async fn load(&self) -> Result<(), CacheError> {
        if !self.path.exists() {
            return Ok(());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        let document: CacheDocument = serde_json::from_str(&content).unwrap_or_else(|_| CacheDocument {
            version: CACHE_DOCUMENT_VERSION,
            mcp_servers: HashMap::new(),
            custom_mcp_results: HashMap::new(),
            metadata: CacheMetadata::new(),
        });
        *self.entries.write().await = document.custom_mcp_results;
        *self.mcp_servers.write().await = document.mcp_servers;
        *self.metadata.write().await = document.metadata;
        Ok(())
    }

    async fn persist(&self) -> Result<(), CacheError> {
        self.metadata.write().await.record_write();

        let document = CacheDocument {
            version: CACHE_DOCUMENT_VERSION,
            mcp_servers: self.mcp_servers.read().await.clone(),
            custom_mcp_results: self.entries.read().await.clone(),
            metadata: self.metadata.read().await.clone(),
        };
        let content = serde_json::to_string_pretty(&document)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Record a service's tool list in the cache's `mcpServers` section
    /// (§4.3 `ToolSync`), overwriting any previous snapshot for that service.
    pub async fn put_service_tools(&self, service_name: String, tools: Vec<ToolDescriptor>) {
        let snapshot = ServiceToolsSnapshot { tools, at: chrono::Utc::now() };
        self.mcp_servers.write().await.insert(service_name, snapshot);
        let _ = self.persist().await;
    }

    /// The last-synced tool list for one service, if any.
    pub async fn service_tools(&self, service_name: &str) -> Option<Vec<ToolDescriptor>> {
        self.mcp_servers.read().await.get(service_name).map(|snapshot| snapshot.tools.clone())
    }

    /// Returns the cached result exactly once, consuming the entry if present.
    pub async fn take_once(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(key)?;
        let result = entry.take_once();
        drop(entries);
        if result.is_some() {
            let _ = self.persist().await;
        }
        result
    }

    pub async fn put_pending(&self, key: String) {
        let entry = CacheEntry::pending(key.clone(), self.default_ttl_ms);
        self.entries.write().await.insert(key, entry);
        let _ = self.persist().await;
    }

    pub async fn put_completed(&self, key: String, result: Value) {
        let entry = CacheEntry::completed(key.clone(), result, self.default_ttl_ms);
        self.entries.write().await.insert(key, entry);
        let _ = self.persist().await;
    }

    pub async fn put_failed(&self, key: String) {
        let entry = CacheEntry::failed(key.clone(), self.default_ttl_ms);
        self.entries.write().await.insert(key, entry);
        let _ = self.persist().await;
    }

    pub async fn status(&self, key: &str) -> Option<CacheEntryStatus> {
        self.entries.read().await.get(key).map(|entry| entry.status)
    }

    /// Remove every entry matching the cleanup predicate (§3).
    pub async fn cleanup(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.eligible_for_cleanup());
        let removed = before - entries.len();
        drop(entries);
        if removed > 0 {
            let _ = self.persist().await;
        }
        removed
    }

    /// Spawn the periodic cleanup timer. Intended to be called once and
    /// left running for the manager's lifetime.
    pub fn spawn_cleanup_loop(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                let removed = self.cleanup().await;
                if removed > 0 {
                    tracing::debug!(removed, "cache cleanup pass");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completed_entry_round_trips_through_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp-cache.json");

        let manager = CacheManager::new(path.clone());
        manager.put_completed("add_abc".to_string(), serde_json::json!({"sum": 3})).await;

        let reloaded = CacheManager::new(path);
        reloaded.load().await.unwrap();
        let result = reloaded.take_once("add_abc").await;
        assert_eq!(result, Some(serde_json::json!({"sum": 3})));
        assert!(reloaded.take_once("add_abc").await.is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_failed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CacheManager::new(dir.path().join("mcp-cache.json"));
        manager.put_failed("bad_key".to_string()).await;
        let removed = manager.cleanup().await;
        assert_eq!(removed, 1);
        assert!(manager.status("bad_key").await.is_none());
    }

    fn sample_tool(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            original_name: name.to_string(),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
            service_name: "calc".to_string(),
            enabled: true,
            stats: Default::default(),
        }
    }

    #[tokio::test]
    async fn service_tools_round_trip_through_the_full_document_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp-cache.json");

        let manager = CacheManager::new(path.clone());
        manager.put_service_tools("calc".to_string(), vec![sample_tool("add")]).await;

        let on_disk = tokio::fs::read_to_string(&path).await.unwrap();
        let document: serde_json::Value = serde_json::from_str(&on_disk).unwrap();
        assert_eq!(document["version"], serde_json::json!(1));
        assert_eq!(document["mcpServers"]["calc"]["tools"][0]["original_name"], serde_json::json!("add"));
        assert_eq!(document["metadata"]["totalWrites"], serde_json::json!(1));

        let reloaded = CacheManager::new(path);
        reloaded.load().await.unwrap();
        let tools = reloaded.service_tools("calc").await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].original_name, "add");
    }
}
