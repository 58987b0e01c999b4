//! Upstream service connection management (§4.2).

pub mod backoff;
pub mod mcp_service;
pub mod transport;

pub use mcp_service::MCPService;
pub use transport::{build_transport, Transport};
