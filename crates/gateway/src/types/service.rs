//! The service lifecycle finite state machine (§4.2) and its sibling
//! observability record. These are intentionally separate: the FSM drives
//! control flow, `ServiceHealth` is a point-in-time snapshot for diagnostics.

use xzcli_gateway_types::TransportStatus;

/// Lifecycle states for one [`crate::service::mcp_service::McpService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ServiceState {
    /// Whether a `callTool` dispatch may be attempted in this state.
    pub fn accepts_calls(&self) -> bool {
        matches!(self, ServiceState::Connected)
    }
}

/// Per-service observability snapshot (ammendment, §3 `ServiceHealth`).
#[derive(Debug, Clone)]
pub struct ServiceHealth {
    pub healthy: bool,
    pub last_check: Option<std::time::SystemTime>,
    pub start_time: Option<std::time::SystemTime>,
    pub handshake_latency_ms: Option<u64>,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub transport_status: TransportStatus,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self {
            healthy: false,
            last_check: None,
            start_time: None,
            handshake_latency_ms: None,
            failure_count: 0,
            last_error: None,
            transport_status: TransportStatus::Disconnected,
        }
    }
}

impl ServiceHealth {
    pub fn mark_healthy(&mut self, handshake_latency_ms: Option<u64>) {
        self.healthy = true;
        self.failure_count = 0;
        self.last_error = None;
        self.last_check = Some(std::time::SystemTime::now());
        self.transport_status = TransportStatus::Connected;
        if handshake_latency_ms.is_some() {
            self.handshake_latency_ms = handshake_latency_ms;
        }
    }

    pub fn mark_unhealthy(&mut self, error_message: String) {
        self.healthy = false;
        self.failure_count += 1;
        self.last_error = Some(error_message);
        self.last_check = Some(std::time::SystemTime::now());
        self.transport_status = TransportStatus::Error;
    }

    pub fn mark_disconnected(&mut self) {
        self.healthy = false;
        self.transport_status = TransportStatus::Disconnected;
        self.last_check = Some(std::time::SystemTime::now());
    }
}
