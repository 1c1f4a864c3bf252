//! Per-room message history and unread counters.
//!
//! The store reconciles three writers: optimistic local sends, stream
//! deliveries and poll snapshots. Its rules:
//!
//! - History is append-only and bounded. Once a room exceeds the cap it is
//!   trimmed to half the cap in one step, so sustained traffic does not pay an
//!   eviction per message.
//! - A delivered message whose service ID was already seen in the room is
//!   dropped, and so is one older than the oldest message the room dropped
//!   while trimming. A service replay of the full history therefore cannot
//!   re-append messages that fell out of the window.
//! - A locally sent message is appended immediately without an ID and leaves a
//!   pending echo. The first delivered message from the same author with the
//!   same content absorbs that echo instead of being appended again.
//! - A poll snapshot replaces the history wholesale and resets the pending
//!   echoes. Every ID in the snapshot counts as seen, including the ones cut
//!   to fit the cap.
//! - The unread counter is only ever overwritten with the service's value or
//!   zeroed by [`RoomStore::mark_read`]. It is never incremented locally.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use murmur_proto::{MessageId, RoomId};

/// Where a message originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Authored by the local user.
    Sent,
    /// Authored by someone else.
    Received,
}

/// A chat message. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Service ID. `None` for optimistic local sends.
    pub id: Option<MessageId>,
    /// Message text.
    pub content: String,
    /// Author nickname.
    pub author: String,
    /// Local or remote author.
    pub origin: Origin,
    /// Service timestamp, or local time for optimistic sends.
    pub timestamp: DateTime<Utc>,
    /// Room the message belongs to.
    pub room: RoomId,
}

/// Result of [`RoomStore::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The message was added to the history.
    Appended,
    /// A message with the same service ID is already known, or the message
    /// predates the retained window.
    Duplicate,
    /// The message is the service's copy of an optimistic local send.
    EchoAbsorbed,
}

/// One room's cached state.
#[derive(Debug, Clone)]
pub struct Room {
    id: RoomId,
    name: String,
    messages: Vec<Message>,
    unread: u32,
    seen: HashSet<MessageId>,
    /// Timestamp of the oldest retained service message once anything older
    /// has been dropped.
    floor: Option<DateTime<Utc>>,
    /// `(author, content)` of optimistic sends not yet seen from the service.
    pending_echoes: VecDeque<(String, String)>,
}

impl Room {
    fn new(id: RoomId) -> Self {
        let name = id.to_string();
        Self {
            id,
            name,
            messages: Vec::new(),
            unread: 0,
            seen: HashSet::new(),
            floor: None,
            pending_echoes: VecDeque::new(),
        }
    }

    /// Room ID.
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Display name. Defaults to the room ID.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server-reported unread count.
    pub fn unread(&self) -> u32 {
        self.unread
    }

    /// Number of cached messages.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Optimistic sends still waiting for the service's copy.
    pub fn pending_echoes(&self) -> usize {
        self.pending_echoes.len()
    }

    fn absorb_echo(&mut self, author: &str, content: &str) -> bool {
        let position =
            self.pending_echoes.iter().position(|(a, c)| a == author && c == content);
        position.and_then(|i| self.pending_echoes.remove(i)).is_some()
    }

    fn rebuild_seen(&mut self) {
        self.seen = self.messages.iter().filter_map(|m| m.id.clone()).collect();
    }

    fn predates_window(&self, message: &Message) -> bool {
        self.floor.is_some_and(|floor| message.timestamp < floor)
    }

    fn raise_floor(&mut self) {
        let oldest = self.messages.iter().find(|m| m.id.is_some()).map(|m| m.timestamp);
        self.floor = self.floor.max(oldest);
    }
}

/// Borrowed, restartable view over a room's history, oldest first.
///
/// Iterating does not copy messages; calling [`History::iter`] again starts
/// over from the oldest message in the view.
#[derive(Debug, Clone, Copy)]
pub struct History<'a> {
    messages: &'a [Message],
}

impl<'a> History<'a> {
    /// Iterate from the oldest message in the view to the most recent.
    pub fn iter(&self) -> std::slice::Iter<'a, Message> {
        self.messages.iter()
    }

    /// Narrow the view to the `n` most recent messages.
    #[must_use]
    pub fn last(self, n: usize) -> Self {
        let start = self.messages.len().saturating_sub(n);
        Self { messages: &self.messages[start..] }
    }

    /// Number of messages in the view.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if the view holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl<'a> IntoIterator for History<'a> {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

/// Bounded per-room message store.
#[derive(Debug, Clone)]
pub struct RoomStore {
    rooms: HashMap<RoomId, Room>,
    cap: usize,
}

impl RoomStore {
    /// Create a store keeping at most `cap` messages per room.
    pub fn new(cap: usize) -> Self {
        Self { rooms: HashMap::new(), cap: cap.max(2) }
    }

    /// Per-room message cap.
    pub fn cap(&self) -> usize {
        self.cap
    }

    fn room_mut(&mut self, room: &RoomId) -> &mut Room {
        self.rooms.entry(room.clone()).or_insert_with(|| Room::new(room.clone()))
    }

    /// Append `message` to `room`, creating the room if unknown.
    pub fn append(&mut self, room: &RoomId, message: Message) -> AppendOutcome {
        let cap = self.cap;
        let state = self.room_mut(room);

        match &message.id {
            Some(id) if state.seen.contains(id) || state.predates_window(&message) => {
                return AppendOutcome::Duplicate;
            },
            Some(id) => {
                if message.origin == Origin::Sent
                    && state.absorb_echo(&message.author, &message.content)
                {
                    state.seen.insert(id.clone());
                    return AppendOutcome::EchoAbsorbed;
                }
                state.seen.insert(id.clone());
            },
            None => {
                if message.origin == Origin::Sent {
                    let key = (message.author.clone(), message.content.clone());
                    state.pending_echoes.push_back(key);
                    if state.pending_echoes.len() > cap {
                        state.pending_echoes.pop_front();
                    }
                }
            },
        }

        state.messages.push(message);
        if state.messages.len() > cap {
            let evict = state.messages.len() - cap / 2;
            state.messages.drain(..evict);
            state.raise_floor();
            tracing::debug!(room = %room, evicted = evict, "trimmed room history");
            if state.seen.len() > cap.saturating_mul(2) {
                state.rebuild_seen();
            }
        }

        AppendOutcome::Appended
    }

    /// Replace the cached history of `room` with a service snapshot.
    ///
    /// The snapshot is authoritative: optimistic messages not present in it
    /// disappear, pending echoes are dropped, and only the snapshot's IDs
    /// count as seen. Messages cut to fit the cap stay seen, so a later replay
    /// of the same history is dropped instead of appended after the newest.
    pub fn replace_history(&mut self, room: &RoomId, mut messages: Vec<Message>) {
        let cap = self.cap;
        let seen = messages.iter().filter_map(|m| m.id.clone()).collect();
        let truncated = messages.len() > cap;
        if truncated {
            messages.drain(..messages.len() - cap);
        }

        let state = self.room_mut(room);
        state.messages = messages;
        state.pending_echoes.clear();
        state.seen = seen;
        state.floor = None;
        if truncated {
            state.raise_floor();
        }
    }

    /// History of `room`, oldest first. Empty for unknown rooms.
    pub fn get_history(&self, room: &RoomId) -> History<'_> {
        let messages = self.rooms.get(room).map_or(&[][..], |r| r.messages.as_slice());
        History { messages }
    }

    /// Overwrite the unread count with the service's value.
    pub fn update_stats(&mut self, room: &RoomId, unread: u32) {
        self.room_mut(room).unread = unread;
    }

    /// Zero the unread count locally. Idempotent.
    ///
    /// The caller is responsible for acknowledging the read to the service.
    pub fn mark_read(&mut self, room: &RoomId) {
        if let Some(state) = self.rooms.get_mut(room) {
            state.unread = 0;
        }
    }

    /// Set the display name of `room`, creating it if unknown.
    pub fn register(&mut self, room: &RoomId, name: impl Into<String>) {
        self.room_mut(room).name = name.into();
    }

    /// Drop every cached message and counter for `room`.
    pub fn remove(&mut self, room: &RoomId) -> Option<Room> {
        self.rooms.remove(room)
    }

    /// Cached state of `room`.
    pub fn room(&self, room: &RoomId) -> Option<&Room> {
        self.rooms.get(room)
    }

    /// Display name of `room`, falling back to its ID.
    pub fn display_name(&self, room: &RoomId) -> String {
        self.rooms.get(room).map_or_else(|| room.to_string(), |r| r.name.clone())
    }

    /// Unread count of `room`. Zero for unknown rooms.
    pub fn unread(&self, room: &RoomId) -> u32 {
        self.rooms.get(room).map_or(0, |r| r.unread)
    }

    /// All cached rooms, in no particular order.
    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }
}
