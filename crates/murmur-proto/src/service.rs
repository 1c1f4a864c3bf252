//! The remote chat service seen from the client.
//!
//! The [`ChatService`] trait decouples the engine from a specific transport.
//! Every call is room- or user-scoped and may fail with a [`ServiceError`].
//! The engine bounds each call with its own request timeout, so
//! implementations do not need to.

use std::future::Future;

use tokio::sync::mpsc;

use crate::{MessageId, RoomId, RoomStats, ServiceError, StreamEvent, WireMessage};

/// Both halves of an open chat stream.
///
/// Dropping `outbound` half-closes the stream. `inbound` yields `None` or an
/// `Err` once the stream is broken; after that it yields nothing useful and
/// the stream must be reopened.
#[derive(Debug)]
pub struct ChatStream {
    /// Events for the service.
    pub outbound: mpsc::Sender<StreamEvent>,
    /// Events broadcast by the service.
    pub inbound: mpsc::Receiver<Result<StreamEvent, ServiceError>>,
}

/// Client view of the remote chat service.
///
/// # Implementations
///
/// - **Simulation**: `murmur_harness::SimService`, fully in-process
/// - **Network**: a generated RPC client wrapped to this trait
pub trait ChatService: Send + Sync + 'static {
    /// Post a message to a room through the unary path.
    fn send_message(
        &self,
        room: &RoomId,
        nickname: &str,
        content: &str,
    ) -> impl Future<Output = Result<MessageId, ServiceError>> + Send;

    /// Rooms the user belongs to, with unread counts.
    fn get_user_chats(
        &self,
        nickname: &str,
    ) -> impl Future<Output = Result<Vec<RoomStats>, ServiceError>> + Send;

    /// Create a room owned by `nickname` and return its ID.
    fn create_chat(
        &self,
        name: &str,
        nickname: &str,
    ) -> impl Future<Output = Result<RoomId, ServiceError>> + Send;

    /// Add `nickname` to an existing room.
    fn join_chat(
        &self,
        room: &RoomId,
        nickname: &str,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// Remove `nickname` from a room.
    fn leave_chat(
        &self,
        room: &RoomId,
        nickname: &str,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// Full stored history of a room, oldest first.
    fn get_messages(
        &self,
        room: &RoomId,
    ) -> impl Future<Output = Result<Vec<WireMessage>, ServiceError>> + Send;

    /// Acknowledge every message in the room as read by `nickname`.
    fn set_messages_read(
        &self,
        room: &RoomId,
        nickname: &str,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    /// Messages other users posted to rooms `nickname` belongs to.
    fn get_received_messages(
        &self,
        nickname: &str,
    ) -> impl Future<Output = Result<Vec<WireMessage>, ServiceError>> + Send;

    /// Messages `nickname` posted.
    fn get_sent_messages(
        &self,
        nickname: &str,
    ) -> impl Future<Output = Result<Vec<WireMessage>, ServiceError>> + Send;

    /// Open the bidirectional chat stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be established.
    fn open_stream(&self) -> impl Future<Output = Result<ChatStream, ServiceError>> + Send;
}
