//! FIFO of locally produced stream events.
//!
//! Producers enqueue without blocking. The single consumer, the stream pump,
//! peeks the front event, transmits it, and only then acknowledges it, so an
//! event that could not be written stays queued for the next stream.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use murmur_proto::{EventKind, RoomId, StreamEvent};
use tokio::sync::{Notify, futures::Notified};

/// Kind of a locally produced event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    /// Chat message.
    Message,
    /// We joined a room.
    Joined,
    /// We left a room.
    Left,
    /// We created a room.
    Created,
    /// Stream registration.
    Connected,
    /// Idle keepalive.
    Heartbeat,
    /// We opened a room.
    EnteredRoom,
}

/// Event waiting to be written to the chat stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEvent {
    /// Event kind.
    pub kind: OutboundKind,
    /// Message text or room name. Empty for lifecycle events.
    pub payload: String,
    /// Target room. `None` for connection-level events.
    pub room: Option<RoomId>,
}

impl OutboundEvent {
    fn new(kind: OutboundKind, room: Option<RoomId>, payload: impl Into<String>) -> Self {
        Self { kind, payload: payload.into(), room }
    }

    /// Chat message for `room`.
    pub fn message(room: RoomId, text: impl Into<String>) -> Self {
        Self::new(OutboundKind::Message, Some(room), text)
    }

    /// Join announcement for `room`.
    pub fn joined(room: RoomId) -> Self {
        Self::new(OutboundKind::Joined, Some(room), "")
    }

    /// Leave announcement for `room`.
    pub fn left(room: RoomId) -> Self {
        Self::new(OutboundKind::Left, Some(room), "")
    }

    /// Creation announcement for `room` named `name`.
    pub fn created(room: RoomId, name: impl Into<String>) -> Self {
        Self::new(OutboundKind::Created, Some(room), name)
    }

    /// Stream registration.
    pub fn connected() -> Self {
        Self::new(OutboundKind::Connected, None, "")
    }

    /// Idle keepalive.
    pub fn heartbeat() -> Self {
        Self::new(OutboundKind::Heartbeat, None, "")
    }

    /// Entered-room announcement for `room`.
    pub fn entered(room: RoomId) -> Self {
        Self::new(OutboundKind::EnteredRoom, Some(room), "")
    }

    /// Wire form of this event, sent as `nickname`.
    pub fn into_stream_event(self, nickname: &str) -> StreamEvent {
        let kind = match self.kind {
            OutboundKind::Heartbeat => return StreamEvent::heartbeat(nickname),
            OutboundKind::Message => EventKind::Message,
            OutboundKind::Joined => EventKind::UserJoined,
            OutboundKind::Left => EventKind::UserLeft,
            OutboundKind::Created => EventKind::ChatCreated,
            OutboundKind::Connected => EventKind::UserConnected,
            OutboundKind::EnteredRoom => EventKind::UserGotIn,
        };
        StreamEvent::new(kind, nickname, self.room, self.payload)
    }
}

#[derive(Debug, Default)]
struct Inner {
    events: Mutex<VecDeque<OutboundEvent>>,
    /// Signalled on every enqueue.
    ready: Notify,
    /// Signalled whenever the queue becomes empty.
    drained: Notify,
}

/// Unbounded strict-FIFO queue shared between producers and the pump.
///
/// Cloning yields another handle to the same queue.
#[derive(Debug, Clone, Default)]
pub struct OutboundQueue {
    inner: Arc<Inner>,
}

impl OutboundQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn events(&self) -> MutexGuard<'_, VecDeque<OutboundEvent>> {
        self.inner.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `event` and wake the consumer. Never blocks.
    pub fn enqueue(&self, event: OutboundEvent) {
        self.events().push_back(event);
        self.inner.ready.notify_one();
    }

    /// Put `event` ahead of everything queued and wake the consumer.
    pub fn enqueue_first(&self, event: OutboundEvent) {
        self.events().push_front(event);
        self.inner.ready.notify_one();
    }

    /// Clone of the oldest event, if any.
    pub fn peek(&self) -> Option<OutboundEvent> {
        self.events().front().cloned()
    }

    /// Remove the oldest event after it has been transmitted.
    pub fn ack(&self) -> Option<OutboundEvent> {
        let mut events = self.events();
        let event = events.pop_front();
        if events.is_empty() {
            drop(events);
            self.inner.drained.notify_waiters();
        }
        event
    }

    /// Drop every queued event, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut events = self.events();
            let dropped = events.len();
            events.clear();
            dropped
        };
        self.inner.drained.notify_waiters();
        dropped
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.events().len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.events().is_empty()
    }

    /// Resolves after the next enqueue, or immediately if an enqueue happened
    /// since the consumer last waited.
    pub fn ready(&self) -> Notified<'_> {
        self.inner.ready.notified()
    }

    /// Wait until every queued event has been acknowledged.
    pub async fn wait_drained(&self) {
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.is_empty() {
                return;
            }
            drained.await;
        }
    }
}
