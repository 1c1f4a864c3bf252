//! Chat stream event vocabulary.
//!
//! The same [`StreamEvent`] shape travels in both directions on the chat
//! stream: the client announces its own actions, the service rebroadcasts
//! them to the other participants of the room.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageId, RoomId};

/// Content of a `UserConnected` event that only keeps the stream alive.
pub const HEARTBEAT_CONTENT: &str = "heartbeat";

/// Kind of a chat stream event.
///
/// Serialized as its numeric wire code. Codes are stable; codes this client
/// does not know decode to [`EventKind::Unknown`] instead of failing, so newer
/// services can extend the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum EventKind {
    /// A chat message.
    Message,
    /// A user joined a room.
    UserJoined,
    /// A user left a room.
    UserLeft,
    /// A room was created.
    ChatCreated,
    /// A user opened a room they are a member of.
    UserGotIn,
    /// A user (re)registered their stream. Also carries heartbeats.
    UserConnected,
    /// Unrecognized wire code.
    Unknown(i32),
}

impl EventKind {
    /// Decode a wire code.
    pub fn from_wire(code: i32) -> Self {
        match code {
            0 => Self::Message,
            1 => Self::UserJoined,
            2 => Self::UserLeft,
            3 => Self::ChatCreated,
            4 => Self::UserGotIn,
            5 => Self::UserConnected,
            other => Self::Unknown(other),
        }
    }

    /// Encode as a wire code.
    pub fn to_wire(self) -> i32 {
        match self {
            Self::Message => 0,
            Self::UserJoined => 1,
            Self::UserLeft => 2,
            Self::ChatCreated => 3,
            Self::UserGotIn => 4,
            Self::UserConnected => 5,
            Self::Unknown(code) => code,
        }
    }
}

impl From<i32> for EventKind {
    fn from(code: i32) -> Self {
        Self::from_wire(code)
    }
}

impl From<EventKind> for i32 {
    fn from(kind: EventKind) -> Self {
        kind.to_wire()
    }
}

/// One event on the chat stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Message ID, set by the service on delivered messages.
    pub id: Option<MessageId>,
    /// Event kind.
    pub kind: EventKind,
    /// Message text, room name, or heartbeat marker depending on kind.
    pub content: String,
    /// Nickname of the user the event originates from.
    pub nickname: String,
    /// Target room. `None` for connection-level events.
    pub room: Option<RoomId>,
    /// Service timestamp. `None` on client-originated events.
    pub created_at: Option<DateTime<Utc>>,
}

impl StreamEvent {
    /// Client-originated event with no ID or timestamp.
    pub fn new(
        kind: EventKind,
        nickname: impl Into<String>,
        room: Option<RoomId>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            kind,
            content: content.into(),
            nickname: nickname.into(),
            room,
            created_at: None,
        }
    }

    /// Idle keepalive for the given nickname.
    pub fn heartbeat(nickname: impl Into<String>) -> Self {
        Self::new(EventKind::UserConnected, nickname, None, HEARTBEAT_CONTENT)
    }

    /// True if this event is a keepalive rather than a real registration.
    pub fn is_heartbeat(&self) -> bool {
        self.kind == EventKind::UserConnected && self.content == HEARTBEAT_CONTENT
    }
}
