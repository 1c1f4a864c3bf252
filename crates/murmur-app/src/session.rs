//! Top-level session state machine.
//!
//! The controller owns the stream pump and the poller and turns user commands
//! into service calls, outbound events and shared-state updates. It has two
//! views, `MainMenu` and `InRoom(room)`.
//!
//! Unary calls made on behalf of a command are bounded by the request
//! timeout. A failing command leaves the session as it was; the error is
//! returned to the caller, and [`SessionController::handle_line`] turns it
//! into a notice.

use std::sync::Arc;

use chrono::Utc;
use murmur_proto::{ChatService, RoomId, ServiceError, WireMessage};
use tokio::sync::watch;

use crate::{
    color::ColorId,
    command::{Command, HELP},
    config::EngineConfig,
    error::{ErrorKind, SessionError, bounded},
    outbound::OutboundEvent,
    poll::{PollSync, TickReport},
    pump::{PumpState, StreamPump},
    room_store::{Message, Origin},
    state::{SharedState, View},
    view::{Mailbox, Outcome, StatusReport, ViewModel, color_messages, room_summaries},
};

/// Drives one user's chat session.
pub struct SessionController<S> {
    service: Arc<S>,
    state: Arc<SharedState>,
    config: EngineConfig,
    pump: StreamPump<S>,
    poll: PollSync<S>,
}

impl<S: ChatService> SessionController<S> {
    /// Create a controller that has not connected yet.
    pub fn new(service: S, config: EngineConfig) -> Self {
        let service = Arc::new(service);
        let state = Arc::new(SharedState::new(&config));
        let pump = StreamPump::new(Arc::clone(&service), Arc::clone(&state), &config);
        let poll = PollSync::new(Arc::clone(&service), Arc::clone(&state), &config);
        Self { service, state, config, pump, poll }
    }

    /// Shared state, for inspection.
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Receiver that wakes whenever the view should be redrawn.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.state.render.subscribe()
    }

    /// Snapshot for the renderer.
    pub fn view(&self) -> ViewModel {
        ViewModel::snapshot(&self.state)
    }

    /// Stream pump state.
    pub fn stream_state(&self) -> PumpState {
        self.pump.state()
    }

    /// Start the session as `nickname`.
    ///
    /// Opens the chat stream, loads the room list and starts the poller.
    ///
    /// # Errors
    ///
    /// - `SessionError::Validation` for a blank nickname or a second start.
    /// - `SessionError::Transport` if the chat stream cannot be opened. This
    ///   is the only fatal error: the session stays unstarted.
    pub async fn start(&mut self, nickname: &str) -> Result<(), SessionError> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(SessionError::validation("nickname must not be empty"));
        }
        if self.state.nickname().is_some() {
            return Err(SessionError::validation("session already started"));
        }

        self.state.session.with(|s| s.nickname = Some(nickname.to_owned()));
        self.state.colors.with(|colors| colors.get_color(nickname));

        if let Err(e) = self.pump.start().await {
            self.state.session.with(|s| s.nickname = None);
            tracing::error!(error = %e, "initial connection failed");
            return Err(e);
        }

        if let Err(e) = self.poll.tick(false).await {
            self.report(&e);
        }
        self.poll.start();

        self.state.notify(format!("Welcome, {nickname}! Type /help for commands."));
        tracing::info!(nickname, "session started");
        Ok(())
    }

    fn nickname(&self) -> Result<String, SessionError> {
        self.state.nickname().ok_or(SessionError::NotInitialized)
    }

    fn is_joined(&self, room: &RoomId) -> bool {
        self.state.session.with(|s| s.is_joined(room))
    }

    async fn call<T>(
        &self,
        call: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        bounded(self.config.request_timeout, call).await
    }

    /// Join `room` on the service and announce it.
    ///
    /// Switches into the room afterwards when auto-switch is enabled. If the
    /// service refuses but the room is already joined, switches into it
    /// instead of failing.
    pub async fn join(&mut self, room: RoomId) -> Result<(), SessionError> {
        let nickname = self.nickname()?;
        if room.is_empty() {
            return Err(SessionError::validation("room id must not be empty"));
        }

        if let Err(e) = self.call(self.service.join_chat(&room, &nickname)).await {
            if !self.is_joined(&room) {
                return Err(e.into());
            }
            tracing::warn!(room = %room, error = %e, "join failed, room already joined");
            self.state.notify(format!("Join failed ({e}), opening {room} instead"));
            return self.switch(room).await;
        }

        self.state.rooms.with(|rooms| {
            if rooms.room(&room).is_none() {
                rooms.register(&room, room.as_str());
            }
        });
        self.state.session.with(|s| s.join(&room));
        self.state.outbound.enqueue(OutboundEvent::joined(room.clone()));
        self.state.notify(format!("Joined {}", self.state.room_name(&room)));
        tracing::info!(room = %room, "joined room");

        if self.config.auto_switch {
            self.switch(room).await?;
        }
        Ok(())
    }

    /// Open a joined room.
    ///
    /// Marks the room read locally and on the service, replaces its history
    /// with the service's copy, and announces the entry on the stream. A
    /// failing acknowledgement or refresh is reported but does not undo the
    /// switch; the cached history is shown instead.
    pub async fn switch(&mut self, room: RoomId) -> Result<(), SessionError> {
        let nickname = self.nickname()?;
        if !self.is_joined(&room) {
            return Err(SessionError::validation(format!(
                "not a member of {room}, /join it first"
            )));
        }

        self.state.rooms.with(|rooms| rooms.mark_read(&room));
        self.state.session.with(|s| {
            if let Some(joined) = s.joined.get_mut(&room) {
                joined.unread = 0;
            }
            s.view = View::InRoom(room.clone());
        });
        self.state.notifications.with(|log| log.purge_unread(&room));

        if let Err(e) = self.call(self.service.set_messages_read(&room, &nickname)).await {
            self.report(&e.into());
        }
        if let Err(e) = self.poll.refresh_room(&room, &nickname).await {
            self.report(&e);
        }

        self.state.outbound.enqueue(OutboundEvent::entered(room.clone()));
        self.state.render.request();
        tracing::debug!(room = %room, "switched room");
        Ok(())
    }

    /// Leave `room`, or the open room when `None`.
    ///
    /// Drops the room's history and notices. Leaving the open room returns to
    /// the main menu.
    pub async fn leave(&mut self, room: Option<RoomId>) -> Result<(), SessionError> {
        let nickname = self.nickname()?;
        let room = match room {
            Some(room) => room,
            None => self
                .state
                .active_room()
                .ok_or_else(|| SessionError::validation("not in a room, use /leave <room>"))?,
        };
        if !self.is_joined(&room) {
            return Err(SessionError::validation(format!("not a member of {room}")));
        }

        self.call(self.service.leave_chat(&room, &nickname)).await?;
        self.state.outbound.enqueue(OutboundEvent::left(room.clone()));

        let name = self.state.room_name(&room);
        self.state.session.with(|s| s.leave(&room));
        self.state.rooms.with(|rooms| rooms.remove(&room));
        self.state.notifications.with(|log| log.purge_room(&room));
        self.state.notify(format!("Left {name}"));
        tracing::info!(room = %room, "left room");
        Ok(())
    }

    /// Create a room named `name` and announce it.
    ///
    /// Switches into the new room when auto-switch is enabled.
    ///
    /// # Errors
    ///
    /// - `SessionError::Data` if the service hands back an empty room id.
    pub async fn create(&mut self, name: &str) -> Result<RoomId, SessionError> {
        let nickname = self.nickname()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::validation("room name must not be empty"));
        }

        let room = self.call(self.service.create_chat(name, &nickname)).await?;
        if room.is_empty() {
            return Err(SessionError::Data(format!("service returned no id for room {name}")));
        }

        self.state.rooms.with(|rooms| rooms.register(&room, name));
        self.state.session.with(|s| s.join(&room));
        self.state.outbound.enqueue(OutboundEvent::created(room.clone(), name));
        self.state.notify(format!("Created {name} ({room})"));
        tracing::info!(room = %room, name, "created room");

        if self.config.auto_switch {
            self.switch(room.clone()).await?;
        }
        Ok(room)
    }

    /// Send `text` to the open room.
    ///
    /// With an active stream the message is shown immediately and queued.
    /// Otherwise it goes out through the unary call and is shown once the
    /// service has accepted it.
    pub async fn send(&mut self, text: &str) -> Result<(), SessionError> {
        let nickname = self.nickname()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::validation("message must not be empty"));
        }
        let room = self
            .state
            .active_room()
            .ok_or_else(|| SessionError::validation("open a room before sending messages"))?;

        let mut message = Message {
            id: None,
            content: text.to_owned(),
            author: nickname.clone(),
            origin: Origin::Sent,
            timestamp: Utc::now(),
            room: room.clone(),
        };

        if self.pump.state() == PumpState::Active {
            self.state.rooms.with(|rooms| rooms.append(&room, message));
            self.state.outbound.enqueue(OutboundEvent::message(room, text));
        } else {
            let id = self.call(self.service.send_message(&room, &nickname, text)).await?;
            tracing::debug!(room = %room, id = %id, "sent message without stream");
            message.id = Some(id);
            self.state.rooms.with(|rooms| rooms.append(&room, message));
        }

        self.state.render.request();
        Ok(())
    }

    /// Return to the main menu.
    pub fn home(&mut self) {
        self.state.session.with(|s| s.view = View::MainMenu);
        self.state.render.request();
    }

    /// Cached history of `room`, or of the open room when `None`.
    pub fn history(&self, room: Option<RoomId>) -> Result<Outcome, SessionError> {
        let room = match room {
            Some(room) => room,
            None => self
                .state
                .active_room()
                .ok_or_else(|| SessionError::validation("not in a room, use /history <room>"))?,
        };
        if !self.is_joined(&room) {
            return Err(SessionError::validation(format!("not a member of {room}")));
        }

        let (name, messages): (String, Vec<Message>) = self.state.rooms.with(|rooms| {
            (rooms.display_name(&room), rooms.get_history(&room).iter().cloned().collect())
        });
        Ok(Outcome::History { room, name, messages: color_messages(&self.state, messages) })
    }

    /// Run a poll tick now, re-fetching the open room.
    pub async fn refresh(&mut self) -> Result<TickReport, SessionError> {
        self.poll.tick(true).await
    }

    /// Session overview.
    pub fn status(&self) -> StatusReport {
        let (nickname, view) = self.state.session.with(|s| (s.nickname.clone(), s.view.clone()));
        StatusReport {
            nickname,
            view,
            stream: self.pump.state(),
            rooms: room_summaries(&self.state),
        }
    }

    /// Empty the notification log.
    pub fn clear_notifications(&mut self) {
        self.state.notifications.with(|log| log.clear());
        self.state.render.request();
    }

    /// Every nickname color assigned so far, sorted by nickname.
    pub fn colors(&self) -> Vec<(String, ColorId)> {
        self.state.colors.with(|colors| {
            colors.assignments().map(|(nick, color)| (nick.to_owned(), color)).collect()
        })
    }

    async fn mailbox(&self, mailbox: Mailbox) -> Result<Vec<WireMessage>, SessionError> {
        let nickname = self.nickname()?;
        let messages = match mailbox {
            Mailbox::Inbox => self.call(self.service.get_received_messages(&nickname)).await?,
            Mailbox::Outbox => self.call(self.service.get_sent_messages(&nickname)).await?,
        };
        self.state.colors.with(|colors| {
            for message in &messages {
                colors.get_color(&message.from);
            }
        });
        Ok(messages)
    }

    /// Messages others posted in our rooms.
    pub async fn inbox(&self) -> Result<Vec<WireMessage>, SessionError> {
        self.mailbox(Mailbox::Inbox).await
    }

    /// Messages we posted.
    pub async fn outbox(&self) -> Result<Vec<WireMessage>, SessionError> {
        self.mailbox(Mailbox::Outbox).await
    }

    /// Restart the chat stream after it closed.
    pub async fn reconnect(&mut self) -> Result<(), SessionError> {
        self.nickname()?;
        self.pump.start().await?;
        self.state.notify("Reconnected");
        Ok(())
    }

    /// Stop the poller and the stream, announcing departure from every room.
    pub async fn shutdown(&mut self) {
        self.poll.stop(self.config.join_timeout).await;
        self.pump.stop().await;
        tracing::info!("session shut down");
    }

    /// Run one command.
    pub async fn execute(&mut self, command: Command) -> Result<Outcome, SessionError> {
        tracing::debug!(?command, "executing command");
        let outcome = match command {
            Command::Join(room) => {
                self.join(room).await?;
                Outcome::None
            },
            Command::Create(name) => {
                self.create(&name).await?;
                Outcome::None
            },
            Command::Leave(room) => {
                self.leave(room).await?;
                Outcome::None
            },
            Command::Switch(room) => {
                self.switch(room).await?;
                Outcome::None
            },
            Command::Home => {
                self.home();
                Outcome::None
            },
            Command::History(room) => self.history(room)?,
            Command::Refresh => {
                self.refresh().await?;
                Outcome::None
            },
            Command::Status => Outcome::Status(self.status()),
            Command::ClearNotifications => {
                self.clear_notifications();
                Outcome::None
            },
            Command::Colors => Outcome::Colors(self.colors()),
            Command::Inbox => {
                Outcome::Mailbox { mailbox: Mailbox::Inbox, messages: self.inbox().await? }
            },
            Command::Outbox => {
                Outcome::Mailbox { mailbox: Mailbox::Outbox, messages: self.outbox().await? }
            },
            Command::Reconnect => {
                self.reconnect().await?;
                Outcome::None
            },
            Command::Help => Outcome::Help(HELP),
            Command::Exit => {
                self.shutdown().await;
                Outcome::Exit
            },
            Command::Send(text) => {
                self.send(&text).await?;
                Outcome::None
            },
        };
        Ok(outcome)
    }

    /// Parse and run one input line, reporting any error as a notice.
    pub async fn handle_line(&mut self, line: &str) -> Outcome {
        let result = match Command::parse(line) {
            Ok(Some(command)) => self.execute(command).await,
            Ok(None) => Ok(Outcome::None),
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            self.report(&e);
            Outcome::None
        })
    }

    /// Record `error` as a notice.
    pub fn report(&self, error: &SessionError) {
        match error.kind() {
            ErrorKind::Validation => tracing::debug!(error = %error, "rejected command"),
            ErrorKind::Transport => tracing::warn!(error = %error, "service call failed"),
            ErrorKind::Data => tracing::warn!(error = %error, "inconsistent service data"),
        }
        let text = match error.kind() {
            ErrorKind::Validation => error.to_string(),
            ErrorKind::Transport | ErrorKind::Data => format!("Error: {error}"),
        };
        self.state.notify(text);
    }
}
