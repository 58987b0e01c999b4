//! Transport status and environment-variable primitives shared by the
//! gateway's service layer and any observability surface built on top of it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transport-specific status information for a service connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportStatus {
    /// Transport is connected and working.
    Connected,
    /// Transport is disconnected.
    Disconnected,
    /// Transport is establishing a connection.
    Connecting,
    /// Transport encountered an error.
    Error,
    /// Transport is not applicable (for example, the service is stopped).
    NotApplicable,
}

impl TransportStatus {
    /// Returns a human-readable description of the transport status.
    pub fn display(&self) -> &'static str {
        match self {
            TransportStatus::Connected => "Connected",
            TransportStatus::Disconnected => "Disconnected",
            TransportStatus::Connecting => "Connecting",
            TransportStatus::Error => "Error",
            TransportStatus::NotApplicable => "N/A",
        }
    }

    /// Returns true when the transport is connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, TransportStatus::Connected)
    }

    /// Returns true when the transport is in an error state.
    pub fn is_error(&self) -> bool {
        matches!(self, TransportStatus::Error)
    }
}

/// Environment variable associated with an upstream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVar {
    /// Environment variable key.
    pub key: String,
    /// Environment variable value (masked for secrets).
    pub value: String,
    /// Source of the environment variable.
    pub source: EnvSource,
    /// Whether the value is effectively resolved.
    pub effective: bool,
}

impl EnvVar {
    /// Creates a new environment variable record.
    pub fn new(key: String, value: String, source: EnvSource) -> Self {
        Self {
            key,
            value,
            source,
            effective: true,
        }
    }

    /// Returns a masked version of the environment variable for display purposes.
    pub fn masked(&self) -> Self {
        let masked_value = if self.is_secret() {
            "••••••••••••••••".to_string()
        } else {
            self.value.clone()
        };

        Self {
            key: self.key.clone(),
            value: masked_value,
            source: self.source.clone(),
            effective: self.effective,
        }
    }

    /// Returns true when this environment variable contains a secret value.
    pub fn is_secret(&self) -> bool {
        matches!(self.source, EnvSource::Secret)
    }
}

/// Source of an environment variable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EnvSource {
    /// From the configuration file (plain text).
    File,
    /// From a secret store.
    Secret,
    /// From the process environment.
    Env,
    /// From a raw text value.
    Raw,
}

impl fmt::Display for EnvSource {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvSource::File => write!(formatter, "file"),
            EnvSource::Secret => write!(formatter, "secret"),
            EnvSource::Env => write!(formatter, "env"),
            EnvSource::Raw => write!(formatter, "raw"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_masking_obscures_secret_values() {
        let env_var = EnvVar::new("GITHUB_TOKEN".to_string(), "secret123".to_string(), EnvSource::Secret);
        let masked = env_var.masked();
        assert_eq!(masked.value, "••••••••••••••••");
        assert!(masked.is_secret());
    }

    #[test]
    fn transport_status_reports_connected_and_error() {
        assert!(TransportStatus::Connected.is_connected());
        assert!(!TransportStatus::Disconnected.is_connected());
        assert!(TransportStatus::Error.is_error());
        assert!(!TransportStatus::Connected.is_error());
    }
}
