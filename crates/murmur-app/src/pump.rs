//! Chat stream pump.
//!
//! Owns one bidirectional chat stream and runs two duties on it as separate
//! tasks:
//!
//! - **Outbound** drains the [`OutboundQueue`](crate::OutboundQueue) in FIFO
//!   order, yielding between events so draining never starves receiving. After
//!   `heartbeat_interval` without a send it writes exactly one heartbeat and
//!   restarts the idle timer.
//! - **Inbound** dispatches every received event into the shared state.
//!
//! ```text
//! Idle -> Starting -> Active -> Stopping -> Closed
//!                       |                    ^
//!                       +--- stream break ---+
//! ```
//!
//! A broken stream moves straight to `Closed`, whether the break shows up as
//! a failed write or as the end of the inbound half. A failed write ends only
//! the outbound duty: events keep being dispatched until the restart. There is
//! no automatic reconnect; [`StreamPump::start`] must be called again, and it
//! resends whatever is still queued.

use std::{fmt, sync::Arc, time::Duration};

use chrono::Utc;
use murmur_proto::{ChatService, ChatStream, EventKind, ServiceError, StreamEvent};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep_until, timeout},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineConfig,
    error::SessionError,
    outbound::OutboundEvent,
    room_store::{AppendOutcome, Message, Origin},
    state::SharedState,
};

/// Lifecycle of the stream pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PumpState {
    /// Never started.
    #[default]
    Idle,
    /// Opening the stream.
    Starting,
    /// Both duties running.
    Active,
    /// Flushing farewell events before cancelling.
    Stopping,
    /// Stream finished or broken. Needs an explicit restart.
    Closed,
}

impl fmt::Display for PumpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Drives the chat stream for one session.
pub struct StreamPump<S> {
    service: Arc<S>,
    state: Arc<SharedState>,
    heartbeat_interval: Duration,
    stop_grace: Duration,
    join_timeout: Duration,
    cancel: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: ChatService> StreamPump<S> {
    /// Create an idle pump.
    pub fn new(service: Arc<S>, state: Arc<SharedState>, config: &EngineConfig) -> Self {
        Self {
            service,
            state,
            heartbeat_interval: config.heartbeat_interval,
            stop_grace: config.stop_grace,
            join_timeout: config.join_timeout,
            cancel: None,
            tasks: Vec::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PumpState {
        self.state.stream_state()
    }

    /// Open the stream and start both duties.
    ///
    /// Allowed from `Idle` and `Closed`. Events still queued from a previous
    /// stream are sent on the new one, after the registration event.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotInitialized` if the session has no nickname.
    /// - `SessionError::Validation` if the pump is already running.
    /// - `SessionError::Transport` if the stream cannot be opened. The pump
    ///   is left `Closed`.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        let nickname = self.state.nickname().ok_or(SessionError::NotInitialized)?;

        let current = self.state.stream_state();
        if matches!(current, PumpState::Starting | PumpState::Active | PumpState::Stopping) {
            return Err(SessionError::validation(format!("stream is already {current}")));
        }

        self.abandon_tasks();
        self.state.stream.with(|s| *s = PumpState::Starting);
        tracing::debug!(nickname = %nickname, "opening chat stream");

        let ChatStream { outbound, inbound } = match self.service.open_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                self.state.stream.with(|s| *s = PumpState::Closed);
                tracing::warn!(error = %e, "failed to open chat stream");
                return Err(e.into());
            },
        };

        self.state.outbound.enqueue_first(OutboundEvent::connected());
        self.state.stream.with(|s| *s = PumpState::Active);

        let cancel = CancellationToken::new();
        let outbound_task = tokio::spawn(outbound_duty(
            Arc::clone(&self.state),
            outbound,
            nickname.clone(),
            self.heartbeat_interval,
            cancel.child_token(),
        ));
        let inbound_task =
            tokio::spawn(inbound_duty(Arc::clone(&self.state), inbound, nickname, cancel.clone()));

        self.tasks = vec![outbound_task, inbound_task];
        self.cancel = Some(cancel);
        self.state.render.request();
        tracing::info!("chat stream active");
        Ok(())
    }

    /// Announce departure from every joined room, flush, and cancel.
    ///
    /// Farewells get `stop_grace` to drain. Each task then gets
    /// `join_timeout` to finish after cancellation and is aborted if it does
    /// not. Events still queued afterwards are dropped.
    pub async fn stop(&mut self) {
        let Some(cancel) = self.cancel.take() else {
            return;
        };

        let was_active = self.state.stream.with(|s| {
            let active = *s == PumpState::Active;
            if active {
                *s = PumpState::Stopping;
            }
            active
        });

        if was_active {
            let joined: Vec<_> = self.state.session.with(|s| s.joined.keys().cloned().collect());
            for room in joined {
                self.state.outbound.enqueue(OutboundEvent::left(room));
            }
            if timeout(self.stop_grace, self.state.outbound.wait_drained()).await.is_err() {
                tracing::warn!(
                    pending = self.state.outbound.len(),
                    "farewell events not flushed within grace period"
                );
            }
        }

        cancel.cancel();
        for mut handle in self.tasks.drain(..) {
            if timeout(self.join_timeout, &mut handle).await.is_err() {
                tracing::warn!("stream task did not stop in time, abandoning it");
                handle.abort();
            }
        }

        let dropped = self.state.outbound.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded unsent outbound events");
        }
        self.state.stream.with(|s| *s = PumpState::Closed);
        self.state.render.request();
        tracing::info!("chat stream stopped");
    }

    fn abandon_tasks(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
    }
}

impl<S> Drop for StreamPump<S> {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

/// Send `event`, giving up if `cancel` fires first.
async fn send_or_cancel(
    tx: &mpsc::Sender<StreamEvent>,
    event: StreamEvent,
    cancel: &CancellationToken,
) -> Option<Result<(), ServiceError>> {
    tokio::select! {
        () = cancel.cancelled() => None,
        sent = tx.send(event) => Some(sent.map_err(|_| ServiceError::StreamClosed)),
    }
}

async fn outbound_duty(
    state: Arc<SharedState>,
    tx: mpsc::Sender<StreamEvent>,
    nickname: String,
    heartbeat_interval: Duration,
    cancel: CancellationToken,
) {
    let mut deadline = Instant::now() + heartbeat_interval;

    loop {
        while let Some(event) = state.outbound.peek() {
            let kind = event.kind;
            match send_or_cancel(&tx, event.into_stream_event(&nickname), &cancel).await {
                None => return,
                Some(Ok(())) => {},
                Some(Err(e)) => {
                    outbound_failed(&state, &e);
                    return;
                },
            }
            state.outbound.ack();
            deadline = Instant::now() + heartbeat_interval;
            tracing::trace!(?kind, "sent outbound event");
            tokio::task::yield_now().await;
        }

        tokio::select! {
            () = cancel.cancelled() => return,
            () = state.outbound.ready() => {},
            () = sleep_until(deadline) => {
                let heartbeat = OutboundEvent::heartbeat().into_stream_event(&nickname);
                match send_or_cancel(&tx, heartbeat, &cancel).await {
                    None => return,
                    Some(Ok(())) => tracing::debug!("sent heartbeat"),
                    Some(Err(e)) => {
                        outbound_failed(&state, &e);
                        return;
                    },
                }
                deadline = Instant::now() + heartbeat_interval;
            },
        }
    }
}

/// Move an active pump to `Closed`. False if it was not active.
fn mark_closed(state: &SharedState) -> bool {
    state.stream.with(|s| {
        let active = *s == PumpState::Active;
        if active {
            *s = PumpState::Closed;
        }
        active
    })
}

fn outbound_failed(state: &SharedState, error: &ServiceError) {
    tracing::warn!(error = %error, queued = state.outbound.len(), "outbound stream duty failed");
    if mark_closed(state) {
        state.notify(format!("Sending failed ({error}). Use /reconnect to restart the stream."));
    }
}

async fn inbound_duty(
    state: Arc<SharedState>,
    mut rx: mpsc::Receiver<Result<StreamEvent, ServiceError>>,
    nickname: String,
    cancel: CancellationToken,
) {
    let reason = loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return,
            next = rx.recv() => next,
        };
        match next {
            Some(Ok(event)) => dispatch(&state, &nickname, event),
            Some(Err(e)) => break e,
            None => break ServiceError::StreamClosed,
        }
    };

    // Outbound has nothing to write to once the stream is gone.
    cancel.cancel();

    if mark_closed(&state) {
        tracing::warn!(error = %reason, "chat stream lost");
        state.notify(format!("Connection lost ({reason}). Use /reconnect to restart the stream."));
    }
}

/// Apply one inbound event to the shared state.
///
/// Every event warms the author's color. Messages are appended to their room
/// and request a redraw unless they were duplicates or absorbed echoes.
/// Lifecycle events by other users become notices about the room. Events
/// authored by `nickname` itself are not announced, and connection events are
/// dropped.
pub(crate) fn dispatch(state: &SharedState, nickname: &str, event: StreamEvent) {
    if !event.nickname.is_empty() {
        state.colors.with(|colors| colors.get_color(&event.nickname));
    }

    let own = event.nickname == nickname;
    let Some(room) = event.room.clone() else {
        tracing::trace!(kind = ?event.kind, "dropped roomless stream event");
        return;
    };

    let verb = match event.kind {
        EventKind::Message => {
            let message = Message {
                id: event.id,
                content: event.content,
                author: event.nickname,
                origin: if own { Origin::Sent } else { Origin::Received },
                timestamp: event.created_at.unwrap_or_else(Utc::now),
                room: room.clone(),
            };
            let outcome = state.rooms.with(|rooms| rooms.append(&room, message));
            tracing::trace!(room = %room, ?outcome, "dispatched message");
            if outcome == AppendOutcome::Appended {
                state.render.request();
            }
            return;
        },
        EventKind::UserJoined => "joined",
        EventKind::UserLeft => "left",
        EventKind::ChatCreated => "created",
        EventKind::UserGotIn => "entered",
        EventKind::UserConnected | EventKind::Unknown(_) => {
            tracing::trace!(kind = ?event.kind, "dropped stream event");
            return;
        },
    };

    if own {
        return;
    }

    let name = if event.kind == EventKind::ChatCreated && !event.content.trim().is_empty() {
        event.content
    } else {
        state.room_name(&room)
    };
    state.notify_room(&room, format!("{} {verb} {name}", event.nickname));
}

#[cfg(test)]
mod tests {
    use murmur_proto::{MessageId, RoomId};

    use super::*;

    fn state() -> SharedState {
        SharedState::new(&EngineConfig::default())
    }

    fn room() -> RoomId {
        RoomId::new("r-1")
    }

    fn delivered(id: &str, from: &str, content: &str) -> StreamEvent {
        StreamEvent {
            id: Some(MessageId::new(id)),
            created_at: Some(Utc::now()),
            ..StreamEvent::new(EventKind::Message, from, Some(room()), content)
        }
    }

    fn notices(state: &SharedState) -> Vec<String> {
        state.notifications.with(|log| log.entries().iter().map(|n| n.text.clone()).collect())
    }

    #[test]
    fn message_is_appended_with_origin() {
        let state = state();
        dispatch(&state, "alice", delivered("m-1", "bob", "hi"));
        dispatch(&state, "alice", delivered("m-2", "alice", "hey"));

        let origins: Vec<Origin> =
            state.rooms.with(|r| r.get_history(&room()).iter().map(|m| m.origin).collect());
        assert_eq!(origins, [Origin::Received, Origin::Sent]);
        assert_eq!(state.render.generation(), 2);
    }

    #[test]
    fn duplicate_delivery_does_not_render() {
        let state = state();
        dispatch(&state, "alice", delivered("m-1", "bob", "hi"));
        dispatch(&state, "alice", delivered("m-1", "bob", "hi"));
        assert_eq!(state.rooms.with(|r| r.get_history(&room()).len()), 1);
        assert_eq!(state.render.generation(), 1);
    }

    #[test]
    fn lifecycle_events_become_scoped_notices() {
        let state = state();
        state.rooms.with(|r| r.register(&room(), "general"));

        dispatch(&state, "alice", StreamEvent::new(EventKind::UserJoined, "bob", Some(room()), ""));
        dispatch(&state, "alice", StreamEvent::new(EventKind::UserGotIn, "bob", Some(room()), ""));
        dispatch(
            &state,
            "alice",
            StreamEvent::new(EventKind::ChatCreated, "carol", Some(RoomId::new("r-2")), "rust"),
        );

        assert_eq!(
            notices(&state),
            ["bob joined general", "bob entered general", "carol created rust"]
        );
        state.notifications.with(|log| log.purge_room(&room()));
        assert_eq!(notices(&state), ["carol created rust"]);
    }

    #[test]
    fn own_lifecycle_and_connection_events_are_silent() {
        let state = state();
        dispatch(&state, "alice", StreamEvent::new(EventKind::UserLeft, "alice", Some(room()), ""));
        dispatch(&state, "alice", StreamEvent::heartbeat("bob"));
        dispatch(&state, "alice", StreamEvent::new(EventKind::Unknown(9), "bob", Some(room()), ""));

        assert!(notices(&state).is_empty());
        assert_eq!(state.render.generation(), 0);
    }

    #[test]
    fn every_event_warms_author_color() {
        let state = state();
        dispatch(&state, "alice", StreamEvent::heartbeat("dave"));
        dispatch(&state, "alice", StreamEvent::new(EventKind::Unknown(7), "erin", None, ""));

        let known: Vec<String> =
            state.colors.with(|c| c.assignments().map(|(n, _)| n.to_owned()).collect());
        assert_eq!(known, ["dave", "erin"]);
    }
}
