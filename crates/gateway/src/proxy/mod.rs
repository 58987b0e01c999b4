//! The downstream proxy surface: one `ProxyServer` per configured endpoint,
//! JSON-RPC request/response shapes, retry policy, and call metrics (§4.5).

pub mod jsonrpc;
pub mod metrics;
pub mod proxy_server;
pub mod retry;

pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use metrics::PerformanceMetrics;
pub use proxy_server::{ProxyServer, ProxyState, ToolCallConfig};
pub use retry::{execute_with_retry, RetryPolicy};
