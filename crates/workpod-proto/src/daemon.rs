//! Daemon IPC definitions
//!
//! The daemon exposes one local socket shared by two protocols. The first byte
//! a client writes decides where the connection goes: [`DAEMON_MARKER`] selects
//! the daemon's own control API, anything else is relayed untouched to the
//! overlay node's local endpoint.

use serde::{Deserialize, Serialize};

/// First byte of a connection destined for the daemon control API
pub const DAEMON_MARKER: u8 = 0x01;

/// Daemon lifecycle state as reported by `GET /status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    Pending,
    Running,
    Stopped,
}

impl DaemonState {
    /// Map the overlay node's backend state onto the daemon state
    pub fn from_backend_state(backend_state: &str) -> Self {
        match backend_state {
            "Starting" => DaemonState::Pending,
            "Running" => DaemonState::Running,
            _ => DaemonState::Stopped,
        }
    }
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonState::Pending => write!(f, "pending"),
            DaemonState::Running => write!(f, "running"),
            DaemonState::Stopped => write!(f, "stopped"),
        }
    }
}

/// `GET /status` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub state: DaemonState,
    pub login_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<serde_json::Value>,
}

/// `GET /version` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub commit: String,
}
