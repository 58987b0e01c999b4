//! Audit trail and redaction helpers (§4.8).

pub mod audit;
pub mod redact;

pub use audit::{AuditAction, AuditEntry, AuditError, AuditLogger, AuditResult};
pub use redact::{redact_json_value, redact_sensitive, redact_sensitive_with};
