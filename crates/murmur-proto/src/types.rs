//! Identifiers and records returned by unary service calls.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, service-allocated room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the service handed back an empty identifier.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Service-allocated message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored message as returned by `GetMessages`, `GetReceivedMessages` and
/// `GetSentMessages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Service-allocated message ID.
    pub id: MessageId,
    /// Message text.
    pub content: String,
    /// Author nickname.
    pub from: String,
    /// Room the message was posted to.
    pub room: RoomId,
    /// Time the service accepted the message.
    pub created_at: DateTime<Utc>,
}

/// Per-room membership statistics as returned by `GetUserChats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStats {
    /// Room the statistics belong to.
    pub room: RoomId,
    /// Messages in the room the user has not acknowledged yet.
    pub unread: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_room_id_is_empty() {
        assert!(RoomId::new("").is_empty());
        assert!(RoomId::new("   ").is_empty());
        assert!(!RoomId::new("r-1").is_empty());
    }

    #[test]
    fn room_id_displays_raw_value() {
        assert_eq!(RoomId::from("general-42").to_string(), "general-42");
    }
}
