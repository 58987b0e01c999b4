//! The one-shot result cache entry (§3 `CacheEntry`) and its key derivation.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tool::ToolDescriptor;

/// Lifecycle status of a cache entry (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheEntryStatus {
    Pending,
    Completed,
    Failed,
    Consumed,
    Deleted,
}

/// Compute `toolName + "_" + md5(JSON.stringify(args))` per the gateway's
/// cache-key formula. `args` is re-serialized through `serde_json` to get a
/// canonical string; callers should pass the same `Value` shape used for
/// dispatch so repeated calls with equal arguments hash identically.
pub fn cache_key(tool_name: &str, args: &Value) -> String {
    let serialized = serde_json::to_string(args).unwrap_or_default();
    let mut hasher = Md5::new();
    hasher.update(serialized.as_bytes());
    let digest = hasher.finalize();
    format!("{tool_name}_{digest:x}")
}

/// A one-shot cached result bridging a short downstream timeout to a
/// longer-running upstream/custom-tool call (§3/§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cache_key: String,
    pub result: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub ttl_ms: u64,
    pub status: CacheEntryStatus,
    pub consumed: bool,
    pub retry_count: u32,
}

impl CacheEntry {
    pub fn pending(cache_key: String, ttl_ms: u64) -> Self {
        Self {
            cache_key,
            result: None,
            timestamp: Utc::now(),
            ttl_ms,
            status: CacheEntryStatus::Pending,
            consumed: false,
            retry_count: 0,
        }
    }

    pub fn completed(cache_key: String, result: Value, ttl_ms: u64) -> Self {
        Self {
            cache_key,
            result: Some(result),
            timestamp: Utc::now(),
            ttl_ms,
            status: CacheEntryStatus::Completed,
            consumed: false,
            retry_count: 0,
        }
    }

    pub fn failed(cache_key: String, ttl_ms: u64) -> Self {
        Self {
            cache_key,
            result: None,
            timestamp: Utc::now(),
            ttl_ms,
            status: CacheEntryStatus::Failed,
            consumed: false,
            retry_count: 0,
        }
    }

    /// Whether this entry is eligible for removal on the next cleanup pass (§3).
    pub fn eligible_for_cleanup(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.timestamp);
        let age_ms = age.num_milliseconds().max(0) as u64;

        self.status == CacheEntryStatus::Failed || age_ms > self.ttl_ms || (self.consumed && age_ms > 60_000)
    }

    /// Returns the result exactly once: a completed, unconsumed entry within
    /// TTL is marked consumed and its result returned; anything else yields
    /// `None`.
    pub fn take_once(&mut self) -> Option<Value> {
        if self.status != CacheEntryStatus::Completed || self.consumed {
            return None;
        }
        let age_ms = Utc::now().signed_duration_since(self.timestamp).num_milliseconds().max(0) as u64;
        if age_ms > self.ttl_ms {
            return None;
        }
        self.consumed = true;
        self.status = CacheEntryStatus::Consumed;
        self.result.clone()
    }
}

/// A service's tool list as last written to the on-disk cache's
/// `mcpServers` section (§4.7), alongside when it was captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceToolsSnapshot {
    pub tools: Vec<ToolDescriptor>,
    pub at: DateTime<Utc>,
}

/// Bookkeeping carried alongside the persisted cache document (§4.7 `metadata`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub last_global_update: DateTime<Utc>,
    pub total_writes: u64,
    pub created_at: DateTime<Utc>,
}

impl CacheMetadata {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            last_global_update: now,
            total_writes: 0,
            created_at: now,
        }
    }

    pub fn record_write(&mut self) {
        self.last_global_update = Utc::now();
        self.total_writes += 1;
    }
}

impl Default for CacheMetadata {
    fn default() -> Self {
        Self::new()
    }
}
