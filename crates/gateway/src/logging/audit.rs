//! Append-only JSON-lines audit trail for service lifecycle and tool-call
//! events (§4.8), grounded on the teacher's `logging/audit.rs`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use super::redact::redact_json_value;

/// Actions that can appear in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditAction {
    ServiceStart,
    ServiceStop,
    ServiceRestart,
    ConfigUpdate,
    ToolInvoke,
    HealthCheck,
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditResult {
    Success,
    Failure,
    Skipped,
}

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
    pub action: AuditAction,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub result: AuditResult,
}

impl AuditEntry {
    pub fn service_started(service_name: String) -> Self {
        Self {
            timestamp: Utc::now(),
            service_name,
            action: AuditAction::ServiceStart,
            metadata: serde_json::Map::new(),
            result: AuditResult::Success,
        }
    }

    pub fn service_start_failed(service_name: String, error: String) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("error".to_string(), serde_json::Value::String(error));
        Self {
            timestamp: Utc::now(),
            service_name,
            action: AuditAction::ServiceStart,
            metadata,
            result: AuditResult::Failure,
        }
    }

    pub fn service_stopped(service_name: String) -> Self {
        Self {
            timestamp: Utc::now(),
            service_name,
            action: AuditAction::ServiceStop,
            metadata: serde_json::Map::new(),
            result: AuditResult::Success,
        }
    }

    pub fn tool_invoke(service_name: String, tool_name: String, result: AuditResult) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("tool_name".to_string(), serde_json::Value::String(tool_name));
        Self {
            timestamp: Utc::now(),
            service_name,
            action: AuditAction::ToolInvoke,
            metadata,
            result,
        }
    }

    pub fn config_update(scope: &str) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("scope".to_string(), serde_json::Value::String(scope.to_string()));
        Self {
            timestamp: Utc::now(),
            service_name: String::new(),
            action: AuditAction::ConfigUpdate,
            metadata,
            result: AuditResult::Success,
        }
    }
}

/// Errors from the audit logger's file I/O.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Append-only audit log with size/age-based rotation. `log()` is
/// best-effort from callers' perspective — failures are logged via
/// `tracing` rather than propagated, matching how the manager invokes it.
#[derive(Debug)]
pub struct AuditLogger {
    log_path: Option<PathBuf>,
    max_size_bytes: u64,
    max_age_days: u64,
}

impl AuditLogger {
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            log_path: Some(log_path),
            max_size_bytes: 10 * 1024 * 1024,
            max_age_days: 7,
        }
    }

    pub fn with_settings(log_path: PathBuf, max_size_bytes: u64, max_age_days: u64) -> Self {
        Self {
            log_path: Some(log_path),
            max_size_bytes,
            max_age_days,
        }
    }

    /// A logger that discards every entry, used where audit persistence is
    /// not configured (e.g. tests, or a state directory that failed to resolve).
    pub fn disabled() -> Self {
        Self {
            log_path: None,
            max_size_bytes: 0,
            max_age_days: 0,
        }
    }

    /// Log an entry, redacting sensitive metadata first. Best-effort: errors
    /// are swallowed after being logged via `tracing`, since a broken audit
    /// sink must never block service lifecycle operations.
    pub async fn log(&self, entry: AuditEntry) {
        if let Err(error) = self.try_log(entry).await {
            tracing::warn!(%error, "failed to write audit log entry");
        }
    }

    async fn try_log(&self, mut entry: AuditEntry) -> Result<(), AuditError> {
        let Some(log_path) = &self.log_path else {
            return Ok(());
        };

        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if self.should_rotate(log_path).await? {
            self.rotate_log(log_path).await?;
        }

        entry.metadata = match redact_json_value(serde_json::Value::Object(entry.metadata)) {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        let json_line = serde_json::to_string(&entry)?;

        let mut file = OpenOptions::new().create(true).append(true).open(log_path).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(log_path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        file.write_all(json_line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    async fn should_rotate(&self, log_path: &PathBuf) -> Result<bool, AuditError> {
        if !log_path.exists() {
            return Ok(false);
        }
        let metadata = tokio::fs::metadata(log_path).await?;
        if metadata.len() > self.max_size_bytes {
            return Ok(true);
        }
        if let Ok(modified) = metadata.modified() {
            if let Ok(age) = std::time::SystemTime::now().duration_since(modified) {
                if age.as_secs() > self.max_age_days * 24 * 60 * 60 {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn rotate_log(&self, log_path: &PathBuf) -> Result<(), AuditError> {
        if !log_path.exists() {
            return Ok(());
        }
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let rotated_path = log_path.with_extension(format!("{timestamp}.jsonl"));
        tokio::fs::rename(log_path, rotated_path).await?;
        Ok(())
    }

    /// Read the most recent `count` entries, oldest first.
    pub async fn read_recent(&self, count: usize) -> Result<Vec<AuditEntry>, AuditError> {
        let Some(log_path) = &self.log_path else {
            return Ok(Vec::new());
        };
        if !log_path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(log_path).await?;
        let mut entries: Vec<AuditEntry> = content.lines().rev().take(count).filter_map(|line| serde_json::from_str(line).ok()).collect();
        entries.reverse();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logs_and_reads_back_an_entry() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::with_settings(dir.path().join("audit.jsonl"), 1024, 1);

        logger.log(AuditEntry::service_started("calc".to_string())).await;

        let entries = logger.read_recent(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].service_name, "calc");
        assert_eq!(entries[0].action, AuditAction::ServiceStart);
    }

    #[tokio::test]
    async fn redacts_sensitive_metadata_before_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::with_settings(dir.path().join("audit.jsonl"), 1024, 1);

        let mut entry = AuditEntry::service_started("calc".to_string());
        entry.metadata.insert("api_key".to_string(), serde_json::Value::String("sk-live-abc".to_string()));
        logger.log(entry).await;

        let raw = tokio::fs::read_to_string(dir.path().join("audit.jsonl")).await.unwrap();
        assert!(!raw.contains("sk-live-abc"));
    }

    #[tokio::test]
    async fn disabled_logger_discards_entries() {
        let logger = AuditLogger::disabled();
        logger.log(AuditEntry::service_started("calc".to_string())).await;
        assert!(logger.read_recent(10).await.unwrap().is_empty());
    }
}
