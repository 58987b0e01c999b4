//! In-process execution of non-MCP ("custom") tools (§4.4).

pub mod function;
pub mod handler;
pub mod http_handler;
pub mod platform;

pub use function::{FunctionRegistry, ToolFn};
pub use handler::{CustomTool, CustomToolHandler, CustomToolRegistry, DEFAULT_TOOL_TIMEOUT_MS};
pub use platform::{PlatformConfig, PlatformRegistry};
