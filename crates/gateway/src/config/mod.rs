//! Configuration loading, interpolation, and validation, split into
//! independent passes the way the rest of the gateway splits concerns.

pub mod interpolation;
pub mod io;
pub mod model;
pub mod validation;

pub use interpolation::InterpolationError;
pub use model::{BackoffStrategy, ConfigError, ConnectionDefaults, GatewayConfig, PingPolicy, ReconnectPolicy, ServiceConfig, TransportKind};
pub use validation::ValidationError;
