//! In-process chat service.
//!
//! Mirrors the behaviour of the production service closely enough for the
//! engine to be tested end to end:
//!
//! - Unary calls mutate rooms, membership and unread counters.
//! - A message posted by one member bumps the unread counter of every other
//!   member.
//! - Stream events are rebroadcast to the other members of the room. The
//!   sender only receives its own broadcast when echo is enabled.
//! - `UserGotIn` and `UserJoined` acknowledge the room as read, and
//!   `UserGotIn` replays the stored history to the entering stream.
//!
//! Every event a client sends on its stream is recorded, which lets tests
//! count heartbeats and check outbound ordering.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::Utc;
use murmur_proto::{
    ChatService, ChatStream, EventKind, MessageId, RoomId, RoomStats, ServiceError, StreamEvent,
    WireMessage,
};
use tokio::sync::mpsc;

/// Buffer size of each stream direction.
const STREAM_BUFFER: usize = 256;

type InboundSender = mpsc::Sender<Result<StreamEvent, ServiceError>>;

/// Event queued for delivery once the state lock is released.
type Delivery = (InboundSender, StreamEvent);

/// Service operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    /// `SendMessage`
    SendMessage,
    /// `GetUserChats`
    GetUserChats,
    /// `CreateChat`
    CreateChat,
    /// `JoinChat`
    JoinChat,
    /// `LeaveChat`
    LeaveChat,
    /// `GetMessages`
    GetMessages,
    /// `SetMessagesRead`
    SetMessagesRead,
    /// `GetReceivedMessages`
    GetReceivedMessages,
    /// `GetSentMessages`
    GetSentMessages,
    /// Opening the chat stream.
    OpenStream,
}

struct SimChat {
    name: String,
    /// Member nickname to unread count.
    members: BTreeMap<String, u32>,
    messages: Vec<WireMessage>,
}

#[derive(Default)]
struct SimState {
    chats: HashMap<RoomId, SimChat>,
    /// Registered stream per nickname, set by the first event on a stream.
    streams: HashMap<String, InboundSender>,
    /// Every event received from any client stream, in arrival order.
    received: Vec<StreamEvent>,
    /// One-shot failures keyed by operation.
    failures: HashMap<SimOp, ServiceError>,
    unreachable: bool,
    /// Streams opened from now on drop every client event.
    deaf: bool,
    /// Inbound halves of deaf streams, kept open until broken.
    deaf_streams: Vec<InboundSender>,
    next_message: u64,
}

impl SimState {
    fn store_message(
        &mut self,
        room: &RoomId,
        nickname: &str,
        content: &str,
    ) -> Result<WireMessage, ServiceError> {
        let chat =
            self.chats.get_mut(room).ok_or_else(|| ServiceError::NotFound(format!("chat {room}")))?;
        if !chat.members.contains_key(nickname) {
            return Err(ServiceError::Rejected(format!("{nickname} is not a member of {room}")));
        }

        self.next_message += 1;
        let message = WireMessage {
            id: MessageId::new(format!("m-{}", self.next_message)),
            content: content.to_owned(),
            from: nickname.to_owned(),
            room: room.clone(),
            created_at: Utc::now(),
        };

        for (member, unread) in &mut chat.members {
            if member != nickname {
                *unread = unread.saturating_add(1);
            }
        }
        chat.messages.push(message.clone());

        Ok(message)
    }

    fn mark_read(&mut self, room: &RoomId, nickname: &str) -> Result<(), ServiceError> {
        let chat =
            self.chats.get_mut(room).ok_or_else(|| ServiceError::NotFound(format!("chat {room}")))?;
        if let Some(unread) = chat.members.get_mut(nickname) {
            *unread = 0;
        }
        Ok(())
    }

    /// Deliveries of `event` to every streaming member of `room`.
    fn broadcast(&self, room: &RoomId, event: &StreamEvent, include_sender: bool) -> Vec<Delivery> {
        let Some(chat) = self.chats.get(room) else {
            return Vec::new();
        };

        chat.members
            .keys()
            .filter(|member| include_sender || member.as_str() != event.nickname.as_str())
            .filter_map(|member| self.streams.get(member))
            .map(|tx| (tx.clone(), event.clone()))
            .collect()
    }
}

fn message_event(message: &WireMessage) -> StreamEvent {
    StreamEvent {
        id: Some(message.id.clone()),
        kind: EventKind::Message,
        content: message.content.clone(),
        nickname: message.from.clone(),
        room: Some(message.room.clone()),
        created_at: Some(message.created_at),
    }
}

/// In-process [`ChatService`] with inspection and fault injection.
///
/// Cloning yields another handle to the same service.
#[derive(Clone, Default)]
pub struct SimService {
    state: Arc<Mutex<SimState>>,
    echo: bool,
}

impl SimService {
    /// Create an empty service that does not echo messages to their sender.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable echoing stream broadcasts back to their sender.
    #[must_use]
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: SimOp, error: ServiceError) {
        self.lock().failures.insert(op, error);
    }

    /// Make every call fail with a transport error until reset.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Make streams opened from now on close their client-to-service half at
    /// once, while the service-to-client half stays open.
    pub fn set_deaf_streams(&self, deaf: bool) {
        self.lock().deaf = deaf;
    }

    /// Break every registered stream.
    ///
    /// Each client receives a [`ServiceError::StreamClosed`] and is forgotten.
    pub fn break_streams(&self) {
        let streams: Vec<InboundSender> = {
            let mut state = self.lock();
            let mut streams: Vec<_> = state.streams.drain().map(|(_, tx)| tx).collect();
            streams.append(&mut state.deaf_streams);
            streams
        };
        for tx in streams {
            if tx.try_send(Err(ServiceError::StreamClosed)).is_err() {
                tracing::debug!("sim: stream already gone while breaking it");
            }
        }
    }

    /// Every event clients have sent on their streams, in arrival order.
    pub fn received_events(&self) -> Vec<StreamEvent> {
        self.lock().received.clone()
    }

    /// Events of `kind` sent by `nickname`, heartbeats excluded.
    pub fn events_from(&self, nickname: &str, kind: EventKind) -> Vec<StreamEvent> {
        self.lock()
            .received
            .iter()
            .filter(|e| e.nickname == nickname && e.kind == kind && !e.is_heartbeat())
            .cloned()
            .collect()
    }

    /// Number of heartbeats `nickname` has sent.
    pub fn heartbeats_from(&self, nickname: &str) -> usize {
        self.lock().received.iter().filter(|e| e.nickname == nickname && e.is_heartbeat()).count()
    }

    /// True if `nickname` has a registered stream.
    pub fn is_streaming(&self, nickname: &str) -> bool {
        self.lock().streams.contains_key(nickname)
    }

    /// Overwrite the unread counter of `nickname` in `room`.
    pub fn set_unread(&self, room: &RoomId, nickname: &str, unread: u32) {
        if let Some(count) =
            self.lock().chats.get_mut(room).and_then(|chat| chat.members.get_mut(nickname))
        {
            *count = unread;
        }
    }

    /// Unread counter of `nickname` in `room`. `None` if not a member.
    pub fn unread(&self, room: &RoomId, nickname: &str) -> Option<u32> {
        self.lock().chats.get(room).and_then(|chat| chat.members.get(nickname).copied())
    }

    /// Members of `room`, sorted.
    pub fn members(&self, room: &RoomId) -> Vec<String> {
        self.lock()
            .chats
            .get(room)
            .map(|chat| chat.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Name `room` was created with.
    pub fn chat_name(&self, room: &RoomId) -> Option<String> {
        self.lock().chats.get(room).map(|chat| chat.name.clone())
    }

    /// Number of stored messages in `room`.
    pub fn message_count(&self, room: &RoomId) -> usize {
        self.lock().chats.get(room).map_or(0, |chat| chat.messages.len())
    }

    fn check(&self, op: SimOp) -> Result<(), ServiceError> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(ServiceError::Transport("service unreachable".into()));
        }
        state.failures.remove(&op).map_or(Ok(()), Err)
    }

    /// Apply one event received on a client stream.
    ///
    /// `reply` is the inbound half of that client's stream.
    fn apply_stream_event(&self, event: StreamEvent, reply: &InboundSender) -> Vec<Delivery> {
        let mut state = self.lock();
        state.received.push(event.clone());

        let nickname = event.nickname.clone();
        state.streams.insert(nickname.clone(), reply.clone());

        match event.kind {
            EventKind::UserConnected | EventKind::Unknown(_) => Vec::new(),
            EventKind::Message => {
                let Some(room) = event.room else {
                    return Vec::new();
                };
                match state.store_message(&room, &nickname, &event.content) {
                    Ok(message) => state.broadcast(&room, &message_event(&message), self.echo),
                    Err(e) => {
                        tracing::debug!(error = %e, "sim: rejected streamed message");
                        Vec::new()
                    },
                }
            },
            EventKind::UserGotIn => {
                let Some(room) = event.room else {
                    return Vec::new();
                };
                if state.mark_read(&room, &nickname).is_err() {
                    return Vec::new();
                }
                state.chats.get(&room).map_or_else(Vec::new, |chat| {
                    chat.messages.iter().map(|m| (reply.clone(), message_event(m))).collect()
                })
            },
            EventKind::UserJoined | EventKind::UserLeft | EventKind::ChatCreated => {
                let Some(room) = event.room.clone() else {
                    return Vec::new();
                };
                if event.kind == EventKind::UserJoined && state.mark_read(&room, &nickname).is_err()
                {
                    return Vec::new();
                }
                let stamped = StreamEvent { created_at: Some(Utc::now()), ..event };
                state.broadcast(&room, &stamped, self.echo)
            },
        }
    }

    async fn deliver(deliveries: Vec<Delivery>) {
        for (tx, event) in deliveries {
            if tx.send(Ok(event)).await.is_err() {
                tracing::debug!("sim: dropping delivery to closed stream");
            }
        }
    }
}

impl ChatService for SimService {
    async fn send_message(
        &self,
        room: &RoomId,
        nickname: &str,
        content: &str,
    ) -> Result<MessageId, ServiceError> {
        self.check(SimOp::SendMessage)?;
        let (id, deliveries) = {
            let mut state = self.lock();
            let message = state.store_message(room, nickname, content)?;
            let deliveries = state.broadcast(room, &message_event(&message), self.echo);
            (message.id, deliveries)
        };
        Self::deliver(deliveries).await;
        Ok(id)
    }

    async fn get_user_chats(&self, nickname: &str) -> Result<Vec<RoomStats>, ServiceError> {
        self.check(SimOp::GetUserChats)?;
        let state = self.lock();
        let mut stats: Vec<RoomStats> = state
            .chats
            .iter()
            .filter_map(|(room, chat)| {
                chat.members.get(nickname).map(|&unread| RoomStats { room: room.clone(), unread })
            })
            .collect();
        stats.sort_by(|a, b| a.room.cmp(&b.room));
        Ok(stats)
    }

    async fn create_chat(&self, name: &str, nickname: &str) -> Result<RoomId, ServiceError> {
        self.check(SimOp::CreateChat)?;
        if name.trim().is_empty() {
            return Err(ServiceError::Rejected("chat name must not be empty".into()));
        }

        let room = RoomId::new(format!("{:016x}", rand::random::<u64>()));
        let chat = SimChat {
            name: name.to_owned(),
            members: BTreeMap::from([(nickname.to_owned(), 0)]),
            messages: Vec::new(),
        };
        self.lock().chats.insert(room.clone(), chat);
        Ok(room)
    }

    async fn join_chat(&self, room: &RoomId, nickname: &str) -> Result<(), ServiceError> {
        self.check(SimOp::JoinChat)?;
        let mut state = self.lock();
        let chat = state
            .chats
            .get_mut(room)
            .ok_or_else(|| ServiceError::NotFound(format!("chat {room}")))?;
        chat.members.entry(nickname.to_owned()).or_insert(0);
        Ok(())
    }

    async fn leave_chat(&self, room: &RoomId, nickname: &str) -> Result<(), ServiceError> {
        self.check(SimOp::LeaveChat)?;
        let mut state = self.lock();
        let chat = state
            .chats
            .get_mut(room)
            .ok_or_else(|| ServiceError::NotFound(format!("chat {room}")))?;
        chat.members
            .remove(nickname)
            .map(|_| ())
            .ok_or_else(|| ServiceError::Rejected(format!("{nickname} is not a member of {room}")))
    }

    async fn get_messages(&self, room: &RoomId) -> Result<Vec<WireMessage>, ServiceError> {
        self.check(SimOp::GetMessages)?;
        self.lock()
            .chats
            .get(room)
            .map(|chat| chat.messages.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("chat {room}")))
    }

    async fn set_messages_read(&self, room: &RoomId, nickname: &str) -> Result<(), ServiceError> {
        self.check(SimOp::SetMessagesRead)?;
        self.lock().mark_read(room, nickname)
    }

    async fn get_received_messages(
        &self,
        nickname: &str,
    ) -> Result<Vec<WireMessage>, ServiceError> {
        self.check(SimOp::GetReceivedMessages)?;
        let state = self.lock();
        let mut messages: Vec<WireMessage> = state
            .chats
            .values()
            .filter(|chat| chat.members.contains_key(nickname))
            .flat_map(|chat| chat.messages.iter().filter(|m| m.from != nickname).cloned())
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn get_sent_messages(&self, nickname: &str) -> Result<Vec<WireMessage>, ServiceError> {
        self.check(SimOp::GetSentMessages)?;
        let state = self.lock();
        let mut messages: Vec<WireMessage> = state
            .chats
            .values()
            .flat_map(|chat| chat.messages.iter().filter(|m| m.from == nickname).cloned())
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn open_stream(&self) -> Result<ChatStream, ServiceError> {
        self.check(SimOp::OpenStream)?;

        let (outbound, mut from_client) = mpsc::channel::<StreamEvent>(STREAM_BUFFER);
        let (to_client, inbound) = mpsc::channel(STREAM_BUFFER);

        {
            let mut state = self.lock();
            if state.deaf {
                drop(from_client);
                state.deaf_streams.push(to_client);
                return Ok(ChatStream { outbound, inbound });
            }
        }

        let sim = self.clone();
        tokio::spawn(async move {
            while let Some(event) = from_client.recv().await {
                let deliveries = sim.apply_stream_event(event, &to_client);
                Self::deliver(deliveries).await;
            }
            sim.lock().streams.retain(|_, tx| !tx.same_channel(&to_client));
        });

        Ok(ChatStream { outbound, inbound })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn connected(sim: &SimService, nickname: &str) -> ChatStream {
        let stream = sim.open_stream().await.unwrap();
        let hello = StreamEvent::new(EventKind::UserConnected, nickname, None, "");
        stream.outbound.send(hello).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        stream
    }

    async fn shared_room(sim: &SimService) -> RoomId {
        let room = sim.create_chat("general", "alice").await.unwrap();
        sim.join_chat(&room, "bob").await.unwrap();
        room
    }

    #[tokio::test]
    async fn message_is_broadcast_to_other_members_only() {
        let sim = SimService::new();
        let room = shared_room(&sim).await;
        let mut alice = connected(&sim, "alice").await;
        let mut bob = connected(&sim, "bob").await;

        alice
            .outbound
            .send(StreamEvent::new(EventKind::Message, "alice", Some(room.clone()), "hi"))
            .await
            .unwrap();

        let delivered = bob.inbound.recv().await.unwrap().unwrap();
        assert_eq!(delivered.kind, EventKind::Message);
        assert_eq!(delivered.content, "hi");
        assert!(delivered.id.is_some());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(alice.inbound.try_recv().is_err());
        assert_eq!(sim.unread(&room, "bob"), Some(1));
        assert_eq!(sim.unread(&room, "alice"), Some(0));
    }

    #[tokio::test]
    async fn echo_delivers_to_sender() {
        let sim = SimService::new().with_echo(true);
        let room = shared_room(&sim).await;
        let mut alice = connected(&sim, "alice").await;

        alice
            .outbound
            .send(StreamEvent::new(EventKind::Message, "alice", Some(room.clone()), "hi"))
            .await
            .unwrap();

        let echoed = alice.inbound.recv().await.unwrap().unwrap();
        assert_eq!(echoed.nickname, "alice");
        assert_eq!(echoed.content, "hi");
    }

    #[tokio::test]
    async fn got_in_replays_history_and_marks_read() {
        let sim = SimService::new();
        let room = shared_room(&sim).await;
        sim.send_message(&room, "alice", "one").await.unwrap();
        sim.send_message(&room, "alice", "two").await.unwrap();
        assert_eq!(sim.unread(&room, "bob"), Some(2));

        let mut bob = connected(&sim, "bob").await;
        bob.outbound
            .send(StreamEvent::new(EventKind::UserGotIn, "bob", Some(room.clone()), ""))
            .await
            .unwrap();

        let first = bob.inbound.recv().await.unwrap().unwrap();
        let second = bob.inbound.recv().await.unwrap().unwrap();
        assert_eq!((first.content.as_str(), second.content.as_str()), ("one", "two"));
        assert_eq!(sim.unread(&room, "bob"), Some(0));
    }

    #[tokio::test]
    async fn break_streams_reports_closed() {
        let sim = SimService::new();
        let mut alice = connected(&sim, "alice").await;

        sim.break_streams();

        assert_eq!(alice.inbound.recv().await, Some(Err(ServiceError::StreamClosed)));
        assert!(!sim.is_streaming("alice"));
    }

    #[tokio::test]
    async fn deaf_stream_rejects_writes_until_broken() {
        let sim = SimService::new();
        sim.set_deaf_streams(true);
        let mut alice = sim.open_stream().await.unwrap();

        assert!(alice.outbound.send(StreamEvent::heartbeat("alice")).await.is_err());
        assert!(alice.inbound.try_recv().is_err());

        sim.break_streams();
        assert_eq!(alice.inbound.recv().await, Some(Err(ServiceError::StreamClosed)));
    }

    #[tokio::test]
    async fn injected_failure_is_one_shot() {
        let sim = SimService::new();
        sim.fail_next(SimOp::GetUserChats, ServiceError::Transport("reset".into()));

        assert!(sim.get_user_chats("alice").await.is_err());
        assert!(sim.get_user_chats("alice").await.is_ok());
    }

    #[tokio::test]
    async fn heartbeats_are_counted_separately() {
        let sim = SimService::new();
        let alice = connected(&sim, "alice").await;
        alice.outbound.send(StreamEvent::heartbeat("alice")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(sim.heartbeats_from("alice"), 1);
        assert_eq!(sim.events_from("alice", EventKind::UserConnected).len(), 1);
    }
}
