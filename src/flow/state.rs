//! Reconciliation channel lifecycle

use serde::Serialize;

/// Where a location subscription currently is.
///
/// `Disconnected -> Connecting -> Connected -> Refetching -> Connected`.
/// Losing the push connection from `Connected` or `Refetching` goes back
/// to `Disconnected` and schedules a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Refetching,
}

impl ChannelState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ChannelState::Connected | ChannelState::Refetching)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Refetching => "refetching",
        };
        f.write_str(name)
    }
}
