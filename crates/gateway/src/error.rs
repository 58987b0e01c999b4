//! Typed errors for the gateway, with a stable mapping onto the JSON-RPC error
//! codes the downstream proxy surface replies with.

use thiserror::Error;

use crate::config::{ConfigError, ValidationError};

/// Top-level gateway error. Every variant maps to a JSON-RPC error code via
/// [`GatewayError::json_rpc_code`].
#[derive(Debug, Error)]
pub enum GatewayError {
    /// `tools/call` params failed validation (missing/malformed `name` or `arguments`).
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// An unrecognized JSON-RPC method was requested.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// `name` does not match any upstream or custom tool.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// The call exceeded its deadline.
    #[error("tool call timed out after {0:?}")]
    ToolTimeout(std::time::Duration),

    /// The tool's owning service is not in the `Connected` state.
    #[error("service '{0}' is not connected")]
    ServiceNotConnected(String),

    /// A generic upstream fault, retryable by default.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// `connect()` was called while already `Connecting`.
    #[error("service '{0}' is already connecting")]
    AlreadyConnecting(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(#[from] ValidationError),

    /// An operation the gateway does not support at runtime (e.g. dynamic endpoint add/remove).
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Transport-level failure below the protocol layer.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Cache persistence failure.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Configuration loading/parsing failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Catch-all internal fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The JSON-RPC error code this variant maps onto, per the gateway's error table.
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            GatewayError::InvalidParams(_) => -32602,
            GatewayError::MethodNotFound(_) => -32601,
            GatewayError::ToolNotFound(_) => -32001,
            GatewayError::ToolTimeout(_) => -32002,
            GatewayError::ServiceNotConnected(_) => -32003,
            GatewayError::Upstream(_) => -32000,
            GatewayError::AlreadyConnecting(_) => -32010,
            GatewayError::ConfigInvalid(_) => -32020,
            GatewayError::NotSupported(_) => 501,
            GatewayError::Transport(_) => -32000,
            GatewayError::Cache(_) => -32603,
            GatewayError::Config(_) => -32603,
            GatewayError::Internal(_) => -32603,
        }
    }

    /// Whether a `ProxyServer` retry loop should retry this error by default.
    pub fn is_retryable_by_default(&self) -> bool {
        matches!(self, GatewayError::Upstream(_) | GatewayError::Transport(_))
    }
}

/// Transport-level errors raised by stdio/SSE/streamable-HTTP connections.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn stdio process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("malformed sse frame: {0}")]
    MalformedFrame(String),

    #[error("transport not connected")]
    NotConnected,

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("rmcp error: {0}")]
    Rmcp(String),
}

/// Cache persistence errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error persisting cache: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
