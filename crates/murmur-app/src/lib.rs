//! Client-side state engine for Murmur multi-room chat.
//!
//! Reconciles three independent sources into one per-room view: periodic
//! unary polling, a live bidirectional event stream, and locally typed
//! messages. Rendering is left to a frontend through the [`Renderer`] trait.
//!
//! # Components
//!
//! - [`ColorAssigner`]: stable nickname colors
//! - [`RoomStore`]: bounded per-room history and unread counters
//! - [`NotificationLog`]: bounded, deduplicated system notices
//! - [`OutboundQueue`]: FIFO of events awaiting transmission
//! - [`StreamPump`]: drives the chat stream (outbound drain, heartbeats,
//!   inbound dispatch)
//! - [`PollSync`]: fixed-interval unary refresh
//! - [`SessionController`]: top-level state machine over all of the above
//! - [`Runtime`]: interactive loop feeding input lines to a session
//!
//! # Echo policy
//!
//! A message we send is appended immediately without a service ID. When the
//! service broadcasts it back, the copy is matched against the pending
//! optimistic entry and absorbed, so the room still holds one message. Any
//! later delivery carrying an ID already seen in the room is dropped.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod color;
mod command;
mod config;
mod error;
mod notifications;
mod outbound;
mod poll;
mod pump;
mod renderer;
mod room_store;
mod runtime;
mod session;
mod state;
mod view;

pub use color::{ColorAssigner, ColorId, DEFAULT_PALETTE};
pub use command::{Command, HELP};
pub use config::{
    DEFAULT_DEDUP_WINDOW, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HISTORY_CAP, DEFAULT_JOIN_TIMEOUT,
    DEFAULT_NOTIFICATION_CAP, DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT, DEFAULT_STOP_GRACE,
    EngineConfig,
};
pub use error::{ErrorKind, SessionError};
pub use notifications::{NoticeKind, Notification, NotificationLog};
pub use outbound::{OutboundEvent, OutboundKind, OutboundQueue};
pub use poll::{HEADER_IN_ROOM, HEADER_MAIN_MENU, PollSync, TickReport};
pub use pump::{PumpState, StreamPump};
pub use renderer::Renderer;
pub use room_store::{AppendOutcome, History, Message, Origin, Room, RoomStore};
pub use runtime::Runtime;
pub use session::SessionController;
pub use state::{JoinedRoom, RenderSignal, SessionState, Shared, SharedState, View};
pub use view::{
    ActiveRoomView, Mailbox, MessageView, Outcome, RoomSummary, StatusReport, ViewModel,
};
