//! Presentation model handed to the renderer.
//!
//! A [`ViewModel`] is an owned snapshot: building it takes each lock briefly
//! and in turn, never two at once.

use chrono::{DateTime, Utc};
use murmur_proto::{RoomId, WireMessage};

use crate::{
    color::ColorId,
    notifications::Notification,
    pump::PumpState,
    room_store::{Message, Origin},
    state::{SharedState, View},
};

/// A message ready to draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    /// Local or remote author.
    pub origin: Origin,
    /// Author nickname.
    pub author: String,
    /// Author color.
    pub color: ColorId,
    /// Message text.
    pub content: String,
    /// Message time.
    pub timestamp: DateTime<Utc>,
}

/// The room currently open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRoomView {
    /// Room ID.
    pub room: RoomId,
    /// Display name.
    pub name: String,
    /// Cached history, oldest first.
    pub messages: Vec<MessageView>,
}

/// One joined room in the room list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    /// Room ID.
    pub room: RoomId,
    /// Display name.
    pub name: String,
    /// Server-reported unread count.
    pub unread: u32,
    /// Cached message count.
    pub messages: usize,
    /// True for the open room.
    pub active: bool,
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewModel {
    /// Local nickname, if started.
    pub nickname: Option<String>,
    /// Current screen.
    pub view: View,
    /// Open room, if any.
    pub active: Option<ActiveRoomView>,
    /// Joined rooms, sorted by ID.
    pub rooms: Vec<RoomSummary>,
    /// Recent notices, oldest first.
    pub notifications: Vec<Notification>,
    /// Stream pump state.
    pub stream: PumpState,
}

/// Output of the session overview command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Local nickname, if started.
    pub nickname: Option<String>,
    /// Current screen.
    pub view: View,
    /// Stream pump state.
    pub stream: PumpState,
    /// Joined rooms.
    pub rooms: Vec<RoomSummary>,
}

/// Which mailbox a listing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mailbox {
    /// Messages others posted in our rooms.
    Inbox,
    /// Messages we posted.
    Outbox,
}

/// Result of a command that produces output beyond state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to show besides the updated view.
    None,
    /// Session overview.
    Status(StatusReport),
    /// Cached history of a room.
    History {
        /// Room ID.
        room: RoomId,
        /// Display name.
        name: String,
        /// Messages, oldest first.
        messages: Vec<MessageView>,
    },
    /// Nickname color assignments, sorted by nickname.
    Colors(Vec<(String, ColorId)>),
    /// Messages fetched from the service.
    Mailbox {
        /// Inbox or outbox.
        mailbox: Mailbox,
        /// Messages, oldest first.
        messages: Vec<WireMessage>,
    },
    /// Usage text.
    Help(&'static str),
    /// The session ended.
    Exit,
}

/// Attach colors to `messages`, assigning new ones as needed.
pub(crate) fn color_messages(state: &SharedState, messages: Vec<Message>) -> Vec<MessageView> {
    state.colors.with(|colors| {
        messages
            .into_iter()
            .map(|m| MessageView {
                origin: m.origin,
                color: colors.get_color(&m.author),
                author: m.author,
                content: m.content,
                timestamp: m.timestamp,
            })
            .collect()
    })
}

/// Summaries of every joined room.
pub(crate) fn room_summaries(state: &SharedState) -> Vec<RoomSummary> {
    let (joined, active) = state.session.with(|s| {
        (s.joined.keys().cloned().collect::<Vec<_>>(), s.active().cloned())
    });

    state.rooms.with(|rooms| {
        joined
            .into_iter()
            .map(|room| {
                let cached = rooms.room(&room);
                RoomSummary {
                    name: rooms.display_name(&room),
                    unread: cached.map_or(0, |r| r.unread()),
                    messages: cached.map_or(0, |r| r.message_count()),
                    active: active.as_ref() == Some(&room),
                    room,
                }
            })
            .collect()
    })
}

impl ViewModel {
    /// Snapshot the shared state.
    pub fn snapshot(state: &SharedState) -> Self {
        let (nickname, view) = state.session.with(|s| (s.nickname.clone(), s.view.clone()));
        let rooms = room_summaries(state);

        let active = view.active().map(|room| {
            let (name, messages) = state.rooms.with(|store| {
                let history = store.get_history(room).iter().cloned().collect::<Vec<_>>();
                (store.display_name(room), history)
            });
            ActiveRoomView { room: room.clone(), name, messages: color_messages(state, messages) }
        });

        Self {
            nickname,
            view,
            active,
            rooms,
            notifications: state.notifications.with(|log| log.entries().to_vec()),
            stream: state.stream_state(),
        }
    }
}
