//! Gateway-internal data types layered on top of the shared plugin/health
//! primitives exported by `xzcli-gateway-types`.

pub mod cache;
pub mod call_record;
pub mod service;
pub mod tool;

pub use cache::{cache_key, CacheEntry, CacheEntryStatus};
pub use call_record::{CallRecord, CallRecordRing};
pub use service::{ServiceHealth, ServiceState};
pub use tool::{exposed_tool_name, normalize_service_name, split_exposed_tool_name, CustomToolConfig, CustomToolHandlerConfig, HttpAuthConfig, ToolDescriptor, ToolStats, NAMESPACE_SEPARATOR};
