//! State shared between the command loop and the background tasks.
//!
//! Each structure sits behind its own lock so a slow poll tick never blocks
//! stream dispatch. Locks are only reachable through [`Shared::with`], whose
//! closure cannot await, so no lock is ever held across network I/O.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use murmur_proto::RoomId;
use tokio::sync::watch;

use crate::{
    color::ColorAssigner,
    config::EngineConfig,
    notifications::{NoticeKind, NotificationLog},
    outbound::OutboundQueue,
    pump::PumpState,
    room_store::RoomStore,
};

/// A value behind its own mutex.
#[derive(Debug, Default)]
pub struct Shared<T>(Mutex<T>);

impl<T> Shared<T> {
    /// Wrap `value`.
    pub fn new(value: T) -> Self {
        Self(Mutex::new(value))
    }

    /// Run `f` with exclusive access.
    ///
    /// A poisoned lock is recovered: every mutation the engine performs leaves
    /// the structure consistent at each step.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl<T: Clone> Shared<T> {
    /// Clone of the current value.
    pub fn snapshot(&self) -> T {
        self.with(|value| value.clone())
    }
}

/// Which screen the session is on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum View {
    /// No active room.
    #[default]
    MainMenu,
    /// Reading and writing in a room.
    InRoom(RoomId),
}

impl View {
    /// Active room, if any.
    pub fn active(&self) -> Option<&RoomId> {
        match self {
            Self::MainMenu => None,
            Self::InRoom(room) => Some(room),
        }
    }
}

/// Cached stats of a joined room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinedRoom {
    /// Last unread count reported by the service.
    pub unread: u32,
}

/// Session-level state.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Current screen.
    pub view: View,
    /// Local nickname. `None` until the session is started.
    pub nickname: Option<String>,
    /// Joined rooms. A map, so no room is ever present twice.
    pub joined: BTreeMap<RoomId, JoinedRoom>,
    /// Timestamp of the newest message the last history replace ended with.
    pub last_seen: HashMap<RoomId, DateTime<Utc>>,
    /// Rooms left locally that a chat list fetched before the leave may still
    /// contain. Cleared once the service stops listing them.
    pub left: HashSet<RoomId>,
}

impl SessionState {
    /// Active room, if any.
    pub fn active(&self) -> Option<&RoomId> {
        self.view.active()
    }

    /// True if `room` is in the joined set.
    pub fn is_joined(&self, room: &RoomId) -> bool {
        self.joined.contains_key(room)
    }

    /// Add `room` to the joined set.
    pub fn join(&mut self, room: &RoomId) {
        self.left.remove(room);
        self.joined.entry(room.clone()).or_default();
    }

    /// Drop `room` from the joined set, returning to the main menu if it was
    /// open.
    pub fn leave(&mut self, room: &RoomId) {
        self.joined.remove(room);
        self.last_seen.remove(room);
        self.left.insert(room.clone());
        if self.active() == Some(room) {
            self.view = View::MainMenu;
        }
    }
}

/// Render request counter observed by the renderer.
#[derive(Debug)]
pub struct RenderSignal(watch::Sender<u64>);

impl Default for RenderSignal {
    fn default() -> Self {
        Self(watch::Sender::new(0))
    }
}

impl RenderSignal {
    /// Ask the renderer to redraw.
    pub fn request(&self) {
        self.0.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Receiver that wakes on every request.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.0.subscribe()
    }

    /// Number of requests so far.
    pub fn generation(&self) -> u64 {
        *self.0.borrow()
    }
}

/// Everything the engine's tasks share.
#[derive(Debug)]
pub struct SharedState {
    /// Message history and unread counters.
    pub rooms: Shared<RoomStore>,
    /// System notices.
    pub notifications: Shared<NotificationLog>,
    /// Nickname colors.
    pub colors: Shared<ColorAssigner>,
    /// View, nickname and joined set.
    pub session: Shared<SessionState>,
    /// Stream pump lifecycle.
    pub stream: Shared<PumpState>,
    /// Events awaiting transmission.
    pub outbound: OutboundQueue,
    /// Redraw requests.
    pub render: RenderSignal,
}

impl SharedState {
    /// Empty state sized by `config`.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            rooms: Shared::new(RoomStore::new(config.history_cap)),
            notifications: Shared::new(NotificationLog::new(
                config.notification_cap,
                config.dedup_window,
            )),
            colors: Shared::new(ColorAssigner::new(config.palette.clone())),
            session: Shared::new(SessionState::default()),
            stream: Shared::new(PumpState::Idle),
            outbound: OutboundQueue::new(),
            render: RenderSignal::default(),
        }
    }

    /// Add an unscoped notice and request a redraw if it was new.
    pub fn notify(&self, text: impl Into<String>) {
        if self.notifications.with(|log| log.add(text)) {
            self.render.request();
        }
    }

    /// Add a notice about `room` and request a redraw if it was new.
    pub fn notify_room(&self, room: &RoomId, text: impl Into<String>) {
        let added = self
            .notifications
            .with(|log| log.add_scoped(Some(room.clone()), NoticeKind::Info, text));
        if added {
            self.render.request();
        }
    }

    /// Local nickname, if the session is started.
    pub fn nickname(&self) -> Option<String> {
        self.session.with(|s| s.nickname.clone())
    }

    /// Active room, if any.
    pub fn active_room(&self) -> Option<RoomId> {
        self.session.with(|s| s.active().cloned())
    }

    /// Current stream pump state.
    pub fn stream_state(&self) -> PumpState {
        self.stream.with(|state| *state)
    }

    /// Display name of `room`.
    pub fn room_name(&self, room: &RoomId) -> String {
        self.rooms.with(|rooms| rooms.display_name(room))
    }
}
