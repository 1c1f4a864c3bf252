//! Periodic unary synchronization.
//!
//! Runs independently of the stream pump. Each tick fetches the per-room
//! unread counts, records them, summarizes changes in rooms other than the
//! open one, and refreshes the open room's history when the service reports
//! unread messages there. A refreshed history replaces the cached one.
//!
//! Tick failures are reported as a notice and retried on the next tick.

use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use murmur_proto::{ChatService, RoomId, RoomStats, WireMessage};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineConfig,
    error::{SessionError, bounded},
    room_store::{Message, Origin},
    state::{SharedState, View},
};

/// Header over unread summaries while no room is open.
pub const HEADER_MAIN_MENU: &str = "New messages in chats:";

/// Header over unread summaries while a room is open.
pub const HEADER_IN_ROOM: &str = "New messages in other chats:";

/// What one tick observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Rooms reported by the service.
    pub rooms: usize,
    /// Rooms whose unread count changed since the previous tick.
    pub changed: Vec<RoomId>,
    /// Rooms the service no longer lists as joined.
    pub removed: Vec<RoomId>,
    /// True if the open room's history was replaced.
    pub refreshed: bool,
}

/// Convert a stored service message for the local user `nickname`.
pub(crate) fn from_wire(message: WireMessage, nickname: &str) -> Message {
    let origin = if message.from == nickname { Origin::Sent } else { Origin::Received };
    Message {
        id: Some(message.id),
        content: message.content,
        author: message.from,
        origin,
        timestamp: message.created_at,
        room: message.room,
    }
}

struct Poller<S> {
    service: Arc<S>,
    state: Arc<SharedState>,
    request_timeout: Duration,
}

impl<S: ChatService> Poller<S> {
    async fn tick(&self, force_refresh: bool) -> Result<TickReport, SessionError> {
        let nickname = self.state.nickname().ok_or(SessionError::NotInitialized)?;
        let before: HashSet<RoomId> =
            self.state.session.with(|s| s.joined.keys().cloned().collect());
        let stats =
            bounded(self.request_timeout, self.service.get_user_chats(&nickname)).await?;

        if stats.iter().any(|s| s.room.is_empty()) {
            return Err(SessionError::Data("chat list entry without room id".into()));
        }

        let (active, changed, removed, stats) = self.state.session.with(|session| {
            let listed: HashSet<&RoomId> = stats.iter().map(|s| &s.room).collect();
            session.left.retain(|room| listed.contains(room));

            // A list fetched before a local leave still contains the room.
            let stats: Vec<RoomStats> =
                stats.iter().filter(|s| !session.left.contains(&s.room)).cloned().collect();

            // Rooms joined while the request was in flight are not in `before`.
            let removed: Vec<RoomId> = session
                .joined
                .keys()
                .filter(|room| before.contains(*room) && !listed.contains(*room))
                .cloned()
                .collect();
            for room in &removed {
                session.joined.remove(room);
                session.last_seen.remove(room);
                if session.active() == Some(room) {
                    session.view = View::MainMenu;
                }
            }

            let mut changed = Vec::new();
            for stat in &stats {
                let entry = session.joined.entry(stat.room.clone()).or_default();
                let previous = entry.unread;
                entry.unread = stat.unread;
                if previous != stat.unread {
                    changed.push((stat.room.clone(), stat.unread));
                }
            }
            (session.active().cloned(), changed, removed, stats)
        });

        for room in &removed {
            let name = self.state.room_name(room);
            self.state.rooms.with(|rooms| rooms.remove(room));
            self.state.notifications.with(|log| log.purge_room(room));
            self.state.notify(format!("No longer a member of {name}"));
            tracing::info!(room = %room, "membership dropped by service");
        }

        self.state.rooms.with(|rooms| {
            for stat in &stats {
                rooms.update_stats(&stat.room, stat.unread);
            }
        });

        let header = if active.is_some() { HEADER_IN_ROOM } else { HEADER_MAIN_MENU };
        for (room, unread) in changed.iter().filter(|(room, _)| Some(room) != active.as_ref()) {
            if *unread == 0 {
                self.state.notifications.with(|log| log.purge_unread(room));
                continue;
            }
            let name = self.state.room_name(room);
            self.state.notifications.with(|log| {
                log.add_header(header);
                log.set_unread(room, format!("• {name}: {unread} new"));
            });
        }
        if !changed.is_empty() {
            self.state.render.request();
        }

        let mut refreshed = false;
        if let Some(room) = &active {
            let pending = stats.iter().any(|s| &s.room == room && s.unread > 0);
            if force_refresh || pending {
                refreshed = self.refresh_room(room, &nickname).await?;
                if pending {
                    bounded(self.request_timeout, self.service.set_messages_read(room, &nickname))
                        .await?;
                    self.state.rooms.with(|rooms| rooms.mark_read(room));
                    self.state.session.with(|s| {
                        if let Some(entry) = s.joined.get_mut(room) {
                            entry.unread = 0;
                        }
                    });
                }
            }
        }

        tracing::debug!(
            rooms = stats.len(),
            changed = changed.len(),
            removed = removed.len(),
            refreshed,
            "poll tick"
        );
        Ok(TickReport {
            rooms: stats.len(),
            changed: changed.into_iter().map(|(room, _)| room).collect(),
            removed,
            refreshed,
        })
    }

    /// Replace the cached history of `room` with the service's copy.
    ///
    /// Skips the replace when the newest service message is the one the
    /// previous replace ended with. Returns true if the history was replaced.
    async fn refresh_room(&self, room: &RoomId, nickname: &str) -> Result<bool, SessionError> {
        let wire = bounded(self.request_timeout, self.service.get_messages(room)).await?;
        let newest: Option<DateTime<Utc>> = wire.iter().map(|m| m.created_at).max();

        let unchanged = self.state.session.with(|s| {
            newest.is_some() && s.last_seen.get(room) == newest.as_ref()
        }) && self.state.rooms.with(|rooms| rooms.room(room).is_some());
        if unchanged {
            tracing::debug!(room = %room, "room history unchanged");
            return Ok(false);
        }

        let messages: Vec<Message> = wire.into_iter().map(|m| from_wire(m, nickname)).collect();
        let count = messages.len();
        self.state.rooms.with(|rooms| rooms.replace_history(room, messages));
        self.state.session.with(|s| match newest {
            Some(ts) => {
                s.last_seen.insert(room.clone(), ts);
            },
            None => {
                s.last_seen.remove(room);
            },
        });

        self.state.render.request();
        tracing::debug!(room = %room, count, "refreshed room history");
        Ok(true)
    }
}

/// Fixed-interval poller.
pub struct PollSync<S> {
    poller: Arc<Poller<S>>,
    interval: Duration,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl<S: ChatService> PollSync<S> {
    /// Create a stopped poller.
    pub fn new(service: Arc<S>, state: Arc<SharedState>, config: &EngineConfig) -> Self {
        Self {
            poller: Arc::new(Poller { service, state, request_timeout: config.request_timeout }),
            interval: config.poll_interval,
            cancel: None,
            task: None,
        }
    }

    /// True while the background ticker runs.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start ticking every interval, first tick one interval from now.
    /// Does nothing if already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let poller = Arc::clone(&self.poller);
        let period = self.interval.max(Duration::from_millis(1));

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {},
                }
                if let Err(e) = poller.tick(false).await {
                    tracing::warn!(error = %e, transient = e.is_transient(), "poll tick failed");
                    let notice = if e.is_transient() {
                        format!("Sync failed ({e}), retrying")
                    } else {
                        format!("Sync failed ({e})")
                    };
                    poller.state.notify(notice);
                }
            }
            tracing::debug!("poll ticker stopped");
        }));
        self.cancel = Some(cancel);
    }

    /// Run one tick now. `/refresh` forces the open room to be re-fetched.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotInitialized` before the session is started.
    /// - `SessionError::Transport` if a service call fails.
    /// - `SessionError::Data` if the chat list contains an entry without id.
    pub async fn tick(&self, force_refresh: bool) -> Result<TickReport, SessionError> {
        self.poller.tick(force_refresh).await
    }

    /// Replace the cached history of `room` with the service's copy.
    pub async fn refresh_room(&self, room: &RoomId, nickname: &str) -> Result<bool, SessionError> {
        self.poller.refresh_room(room, nickname).await
    }

    /// Cancel the ticker and wait up to `limit` for it to finish.
    pub async fn stop(&mut self, limit: Duration) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(mut task) = self.task.take()
            && tokio::time::timeout(limit, &mut task).await.is_err()
        {
            tracing::warn!("poll ticker did not stop in time, abandoning it");
            task.abort();
        }
    }
}

impl<S> Drop for PollSync<S> {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}
