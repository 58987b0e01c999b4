//! Environment-variable interpolation for configuration values.
//!
//! Only the `${env:NAME}` placeholder form is resolved. The teacher's
//! corresponding `${secret:NAME}` form (backed by an OS keyring) is out of
//! scope for this gateway — see DESIGN.md's "Dropped teacher dependency"
//! note — so a `${secret:...}` placeholder is left untouched by this pass
//! and will simply appear verbatim in the resolved config, same as any
//! other literal string.

use std::env;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use xzcli_gateway_types::EnvSource;

use super::model::{GatewayConfig, ServiceConfig};

static ENV_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{env:([\w+_-]*)\}").expect("valid regex"));

/// Interpolation errors.
#[derive(Debug, Error)]
pub enum InterpolationError {
    #[error("missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// Interpolate `${env:NAME}` placeholders throughout every server in the
/// config. A server whose placeholders fail to resolve is marked disabled
/// rather than aborting the whole load, mirroring the non-fatal posture of
/// the rest of the config pipeline.
pub fn interpolate_config(config: &mut GatewayConfig) {
    for (name, server) in config.mcp_servers.iter_mut() {
        if let Err(error) = interpolate_server(server) {
            tracing::warn!(service = name.as_str(), %error, "disabling service: interpolation failed");
            server.disabled = Some(true);
        }
    }
}

fn interpolate_server(server: &mut ServiceConfig) -> Result<(), InterpolationError> {
    if let Some(env_vars) = &mut server.env {
        for var in env_vars.iter_mut() {
            var.value = interpolate_string(&var.value)?;
        }
    }
    if let Some(headers) = &mut server.headers {
        for header in headers.iter_mut() {
            header.value = interpolate_string(&header.value)?;
        }
    }
    if let Some(api_key) = &server.api_key {
        server.api_key = Some(interpolate_string(api_key)?);
    }
    Ok(())
}

/// Substitute every `${env:NAME}` occurrence in `input`, leaving any other
/// placeholder form (e.g. `${secret:...}`) untouched.
pub fn interpolate_string(input: &str) -> Result<String, InterpolationError> {
    let mut error: Option<InterpolationError> = None;
    let resolved = ENV_PLACEHOLDER.replace_all(input, |captures: &regex::Captures| {
        let var_name = &captures[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                if error.is_none() {
                    error = Some(InterpolationError::MissingEnvVar(var_name.to_string()));
                }
                String::new()
            }
        }
    });

    if let Some(error) = error {
        return Err(error);
    }
    Ok(resolved.into_owned())
}

/// Classify a raw value as likely coming from the process environment, a
/// literal file value, or a plain raw string — used when a config entry
/// doesn't explicitly declare its `EnvSource`.
pub fn determine_env_source(value: &str) -> EnvSource {
    if ENV_PLACEHOLDER.is_match(value) {
        EnvSource::Env
    } else {
        EnvSource::Raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_env_placeholder() {
        temp_env::with_var("GATEWAY_TEST_VAR", Some("resolved"), || {
            let out = interpolate_string("prefix-${env:GATEWAY_TEST_VAR}-suffix").unwrap();
            assert_eq!(out, "prefix-resolved-suffix");
        });
    }

    #[test]
    fn missing_env_var_is_an_error() {
        temp_env::with_var_unset("GATEWAY_TEST_MISSING", || {
            let result = interpolate_string("${env:GATEWAY_TEST_MISSING}");
            assert!(matches!(result, Err(InterpolationError::MissingEnvVar(_))));
        });
    }

    #[test]
    fn secret_placeholder_is_left_untouched() {
        let out = interpolate_string("${secret:API_KEY}").unwrap();
        assert_eq!(out, "${secret:API_KEY}");
    }

    #[test]
    fn determine_env_source_detects_placeholder() {
        assert_eq!(determine_env_source("${env:FOO}"), EnvSource::Env);
        assert_eq!(determine_env_source("literal"), EnvSource::Raw);
    }
}
