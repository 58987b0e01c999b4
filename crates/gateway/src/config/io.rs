//! Loading the configuration document from disk and resolving the gateway's
//! persisted-state directory.

use std::path::{Path, PathBuf};

use super::model::{ConfigError, GatewayConfig};
use super::{interpolation, validation};

/// Load, interpolate, and validate a configuration document from `path`.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let mut config: GatewayConfig = serde_json::from_str(&raw)?;

    interpolation::interpolate_config(&mut config);
    validation::validate_config(&mut config)?;

    Ok(config)
}

/// Resolve (and create if absent) the directory the gateway persists its
/// cache file, tool-call history, and audit log under.
pub fn resolve_state_dir(explicit: Option<PathBuf>) -> std::io::Result<PathBuf> {
    let dir = explicit.or_else(|| dirs_next::config_dir().map(|base| base.join("xzcli-gateway"))).unwrap_or_else(|| PathBuf::from(".xzcli-gateway"));

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_interpolates_a_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{
              "mcpEndpoints": ["wss://gateway.example/ws"],
              "mcpServers": {
                "calc": {"command": "calc-server", "args": ["--stdio"]}
              }
            }"#,
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.mcp_endpoints, vec!["wss://gateway.example/ws".to_string()]);
        assert!(config.mcp_servers.contains_key("calc"));
    }

    #[test]
    fn resolve_state_dir_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("state");
        let resolved = resolve_state_dir(Some(explicit.clone())).unwrap();
        assert_eq!(resolved, explicit);
        assert!(resolved.is_dir());
    }
}
