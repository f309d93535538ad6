//! Push subscription transport
//!
//! A push connection joins one group (a location code, or the `ALL`
//! wildcard for aggregate views) and then yields `updated` notifications
//! carrying the identifiers of changed rooms. The wire protocol is not
//! this crate's concern; implementations only have to honour the trait.

use async_trait::async_trait;

use super::directory::Link;
use super::PushError;
use crate::types::RoomId;

/// Manifest relation of the push endpoint.
pub const PUSH_ENDPOINT_REL: &str = "building_websocket";

/// Subscription group for a push connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Location(String),
    All,
}

impl GroupKey {
    pub fn location(code: impl Into<String>) -> Self {
        GroupKey::Location(code.into())
    }

    /// Whether a notification published to `target` reaches this group.
    pub fn receives(&self, target: &GroupKey) -> bool {
        match self {
            GroupKey::All => true,
            GroupKey::Location(code) => match target {
                GroupKey::Location(other) => code.eq_ignore_ascii_case(other),
                GroupKey::All => false,
            },
        }
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupKey::Location(code) => f.write_str(code),
            GroupKey::All => f.write_str("ALL"),
        }
    }
}

/// A notification received on a push connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    /// The listed rooms changed on the server.
    Updated(Vec<RoomId>),
}

/// Opens push connections.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, endpoint: &Link) -> Result<Box<dyn PushConnection>, PushError>;
}

/// One live push connection.
#[async_trait]
pub trait PushConnection: Send + Sync {
    /// Join a notification group.
    async fn join(&self, group: &GroupKey) -> Result<(), PushError>;

    /// Wait for the next notification. Returns `Disconnected` once the
    /// connection is closed from either side.
    async fn recv(&self) -> Result<PushMessage, PushError>;

    async fn close(&self);

    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_routing() {
        let hostel = GroupKey::location("H7");
        assert!(hostel.receives(&GroupKey::location("h7")));
        assert!(!hostel.receives(&GroupKey::location("H8")));
        assert!(GroupKey::All.receives(&hostel));
        assert_eq!(GroupKey::All.to_string(), "ALL");
        assert_eq!(hostel.to_string(), "H7");
    }
}
