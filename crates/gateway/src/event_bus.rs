//! Process-wide typed pub/sub used to propagate config changes and service
//! lifecycle transitions between the gateway's otherwise decoupled components.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::types::tool::ToolDescriptor;

/// Scope of a `config:updated` event, distinguishing a full reload from a
/// narrower change that only one subsystem needs to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigScope {
    /// The entire configuration document was reloaded.
    Full,
    /// Only the custom-tool registry changed.
    CustomMcp,
    /// The tool list for one upstream service changed.
    ServerTools { service_name: String },
}

/// Closed set of events flowing through the gateway's event bus.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// An upstream service finished connecting and published its tool list.
    ServiceConnected {
        service_name: String,
        tools: Arc<Vec<ToolDescriptor>>,
        at: Instant,
    },
    /// An upstream service dropped its connection.
    ServiceDisconnected { service_name: String, reason: String, at: Instant },
    /// A connection attempt failed.
    ServiceConnectionFailed { service_name: String, error: String, attempt: u32 },
    /// Configuration changed at the given scope.
    ConfigUpdated { scope: ConfigScope, at: Instant },
    /// A restart was requested for a service.
    RestartRequested { service_name: String, reason: String },
    /// A restart attempt started.
    RestartStarted { service_name: String, attempt: u32 },
    /// A restart completed successfully.
    RestartCompleted { service_name: String },
    /// A restart attempt failed.
    RestartFailed { service_name: String, error: String, attempt: u32 },
    /// A downstream endpoint's connection state changed.
    EndpointStatusChanged { endpoint: String, connected: bool, operation: &'static str },
    /// A service's health record changed in a notable way.
    HealthChanged { service_name: String, healthy: bool },
}

/// A process-wide broadcast bus. Publishing never blocks on subscribers;
/// a subscriber with a full channel simply misses the oldest backlog
/// (tokio's `broadcast` lag semantics), which is acceptable for the
/// best-effort control-plane signals carried here.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to the event stream. Each subscriber gets its own
    /// independent receive loop; a panic or error in one subscriber's
    /// handling never affects another's delivery order.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns the number of active subscribers that
    /// received it; it is not an error for this to be zero.
    pub fn publish(&self, event: GatewayEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of active subscribers, useful for tests asserting on delivery.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
