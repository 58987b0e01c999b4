//! Structural validation of a loaded [`GatewayConfig`], separate from
//! interpolation: this pass checks shape invariants (§3), interpolation
//! resolves placeholder values.

use thiserror::Error;

use super::model::{GatewayConfig, TransportKind};

/// Configuration validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("service '{0}' has an unrecognized or missing transport kind")]
    UnknownTransportKind(String),

    #[error("stdio service '{0}' is missing a command")]
    StdioMissingCommand(String),

    #[error("{1:?} service '{0}' is missing a url")]
    HttpMissingUrl(String, TransportKind),

    #[error("no endpoints configured: set mcpEndpoint, mcpEndpoints, or MCP_ENDPOINT")]
    NoEndpointsConfigured,
}

/// Validate every service definition and the endpoint list. Filters
/// placeholder/empty endpoint entries (`<...>` or blank) out of
/// `mcp_endpoints` as a side effect, with a warning per dropped entry,
/// mirroring the permissive posture of the rest of config loading.
pub fn validate_config(config: &mut GatewayConfig) -> Result<(), ValidationError> {
    for (name, service) in config.mcp_servers.iter() {
        validate_service(name, service)?;
    }

    config.mcp_endpoints.retain(|endpoint| {
        let keep = !endpoint.trim().is_empty() && !endpoint.trim().starts_with('<');
        if !keep {
            tracing::warn!(endpoint = endpoint.as_str(), "dropping placeholder/empty endpoint entry");
        }
        keep
    });

    Ok(())
}

fn validate_service(name: &str, service: &super::model::ServiceConfig) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyServiceName);
    }

    if service.is_disabled() {
        return Ok(());
    }

    match service.resolve_transport_kind() {
        Some(TransportKind::Stdio) => {
            if service.command.is_none() {
                return Err(ValidationError::StdioMissingCommand(name.to_string()));
            }
        }
        Some(kind @ (TransportKind::Sse | TransportKind::StreamableHttp)) => {
            if service.url.is_none() {
                return Err(ValidationError::HttpMissingUrl(name.to_string(), kind));
            }
        }
        None => return Err(ValidationError::UnknownTransportKind(name.to_string())),
    }

    Ok(())
}

/// Confirm at least one endpoint is reachable, via config or the
/// `MCP_ENDPOINT` environment fallback (§6.4). A gateway with zero
/// endpoints can never serve a downstream client and is a startup fault.
pub fn validate_has_endpoint(config: &GatewayConfig) -> Result<(), ValidationError> {
    let has_legacy = config.mcp_endpoint.as_deref().is_some_and(|value| !value.trim().is_empty());
    let has_list = !config.mcp_endpoints.is_empty();
    let has_env = std::env::var("MCP_ENDPOINT").is_ok_and(|value| !value.trim().is_empty());

    if has_legacy || has_list || has_env {
        Ok(())
    } else {
        Err(ValidationError::NoEndpointsConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::ServiceConfig;
    use std::collections::HashMap;

    #[test]
    fn rejects_stdio_service_without_command() {
        let mut servers = HashMap::new();
        servers.insert(
            "broken".to_string(),
            ServiceConfig {
                transport_kind: Some("stdio".to_string()),
                ..Default::default()
            },
        );
        let mut config = GatewayConfig {
            mcp_servers: servers,
            ..Default::default()
        };
        let result = validate_config(&mut config);
        assert_eq!(result, Err(ValidationError::StdioMissingCommand("broken".to_string())));
    }

    #[test]
    fn drops_placeholder_endpoints() {
        let mut config = GatewayConfig {
            mcp_endpoints: vec!["wss://real.example".to_string(), "<fill-me-in>".to_string(), "".to_string()],
            ..Default::default()
        };
        validate_config(&mut config).unwrap();
        assert_eq!(config.mcp_endpoints, vec!["wss://real.example".to_string()]);
    }

    #[test]
    fn rejects_empty_service_name() {
        let mut servers = HashMap::new();
        servers.insert(String::new(), ServiceConfig::default());
        let mut config = GatewayConfig {
            mcp_servers: servers,
            ..Default::default()
        };
        assert_eq!(validate_config(&mut config), Err(ValidationError::EmptyServiceName));
    }
}
