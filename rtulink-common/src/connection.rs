//! Device connection state.
//!
//! The state is user-visible: it is what a host application reports upward
//! as the connectivity of a bus device. A lost device is a state, not an
//! error.

use serde::{Deserialize, Serialize};

/// Connectivity of a single bus device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Device has not answered yet since the last start.
    #[default]
    Unknown,
    /// Device answered its last transaction.
    Connected,
    /// Polling is stopped.
    Disconnected,
    /// Device exhausted its transmit attempts and is waiting out its delay.
    Lost,
}

impl ConnectionState {
    /// Get the string representation used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Unknown => "unknown",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Lost => "lost",
        }
    }

    /// Parse a state from its report representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unknown" => Some(ConnectionState::Unknown),
            "connected" => Some(ConnectionState::Connected),
            "disconnected" => Some(ConnectionState::Disconnected),
            "lost" => Some(ConnectionState::Lost),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
