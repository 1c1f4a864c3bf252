//! Integration tests driving `SessionController` against `SimService`.
//!
//! # Oracle Pattern
//!
//! Tests end with oracle checks that verify:
//! - The session's view and stores reflect the expected state
//! - The service observed the expected outbound events
//! - Notices are neither lost nor duplicated

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::time::Duration;

use murmur_app::{
    EngineConfig, HEADER_IN_ROOM, Origin, Outcome, PumpState, SessionController, SessionError,
    View,
};
use murmur_harness::{SimOp, SimService};
use murmur_proto::{ChatService, EventKind, RoomId, ServiceError};

/// Config with the background poller effectively disabled, so tests drive
/// polling through `refresh`.
fn config() -> EngineConfig {
    EngineConfig { poll_interval: Duration::from_secs(3600), ..EngineConfig::default() }
}

async fn started(sim: &SimService, nickname: &str) -> SessionController<SimService> {
    let mut session = SessionController::new(sim.clone(), config());
    session.start(nickname).await.expect("session should start");
    session
}

/// Poll `check` until it holds, yielding to background tasks in between.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn notices(session: &SessionController<SimService>) -> Vec<String> {
    session.view().notifications.into_iter().map(|n| n.text).collect()
}

fn history(session: &SessionController<SimService>, room: &RoomId) -> Vec<(Origin, String)> {
    session.state().rooms.with(|rooms| {
        rooms.get_history(room).iter().map(|m| (m.origin, m.content.clone())).collect()
    })
}

fn pending_echoes(session: &SessionController<SimService>, room: &RoomId) -> usize {
    session.state().rooms.with(|rooms| rooms.room(room).map_or(0, |r| r.pending_echoes()))
}

#[tokio::test]
async fn own_message_echo_is_deduplicated() {
    let sim = SimService::new().with_echo(true);
    let mut alice = started(&sim, "alice").await;

    let room = alice.create("general").await.expect("create");
    assert_eq!(alice.view().view, View::InRoom(room.clone()));
    assert_eq!(sim.chat_name(&room).as_deref(), Some("general"));

    alice.send("hi").await.expect("send");
    assert_eq!(history(&alice, &room), [(Origin::Sent, "hi".to_owned())]);

    eventually("echo absorbed", || pending_echoes(&alice, &room) == 0).await;
    assert_eq!(sim.message_count(&room), 1);

    // A later message from someone else lands after the single "hi".
    sim.join_chat(&room, "bob").await.expect("bob joins");
    sim.send_message(&room, "bob", "yo").await.expect("bob sends");
    eventually("bob's message", || history(&alice, &room).len() == 2).await;

    assert_eq!(
        history(&alice, &room),
        [(Origin::Sent, "hi".to_owned()), (Origin::Received, "yo".to_owned())]
    );
}

#[tokio::test]
async fn unread_in_other_room_is_announced_once() {
    let sim = SimService::new();
    let x = sim.create_chat("x-room", "bob").await.expect("create x");
    sim.join_chat(&x, "alice").await.expect("alice joins x");

    let mut alice = started(&sim, "alice").await;
    let y = alice.create("y-room").await.expect("create y");
    assert_eq!(alice.view().view, View::InRoom(y));

    sim.set_unread(&x, "alice", 3);
    alice.refresh().await.expect("first refresh");
    alice.refresh().await.expect("second refresh");

    let texts = notices(&alice);
    let about_x: Vec<&String> = texts.iter().filter(|t| t.contains(x.as_str())).collect();
    assert_eq!(about_x, [&format!("• {x}: 3 new")]);
    assert_eq!(texts.iter().filter(|t| t.as_str() == HEADER_IN_ROOM).count(), 1);

    // Opening the room clears its summary and the now-empty header.
    alice.switch(x.clone()).await.expect("switch");
    let texts = notices(&alice);
    assert!(!texts.iter().any(|t| t.contains(x.as_str()) || t == HEADER_IN_ROOM), "{texts:?}");
    assert_eq!(sim.unread(&x, "alice"), Some(0));
}

#[tokio::test]
async fn entering_room_over_cap_keeps_newest_history() {
    let sim = SimService::new().with_echo(true);
    let room = sim.create_chat("busy", "bob").await.expect("create");
    sim.join_chat(&room, "alice").await.expect("alice joins");
    for i in 0..6 {
        sim.send_message(&room, "bob", &i.to_string()).await.expect("bob sends");
    }

    let config = EngineConfig { history_cap: 4, ..config() };
    let mut alice = SessionController::new(sim.clone(), config);
    alice.start("alice").await.expect("start");
    alice.join(room.clone()).await.expect("join");
    assert_eq!(alice.view().view, View::InRoom(room.clone()));

    let contents = |session: &SessionController<SimService>| -> Vec<String> {
        history(session, &room).into_iter().map(|(_, content)| content).collect()
    };
    assert_eq!(contents(&alice), ["2", "3", "4", "5"]);

    // The service replays the whole room on entry; our echo arrives after it.
    alice.send("mine").await.expect("send");
    eventually("echo absorbed", || pending_echoes(&alice, &room) == 0).await;
    assert_eq!(sim.events_from("alice", EventKind::UserGotIn).len(), 1);

    assert_eq!(
        history(&alice, &room),
        [(Origin::Received, "5".to_owned()), (Origin::Sent, "mine".to_owned())]
    );
}

#[tokio::test(start_paused = true)]
async fn idle_stream_sends_one_heartbeat() {
    let sim = SimService::new();
    let mut alice = started(&sim, "alice").await;
    let room = alice.create("general").await.expect("create");

    tokio::time::sleep(Duration::from_secs(45)).await;
    assert_eq!(sim.heartbeats_from("alice"), 1);

    alice.send("back").await.expect("send");
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(sim.heartbeats_from("alice"), 1, "a real send resets the idle timer");

    let kinds: Vec<EventKind> = sim
        .received_events()
        .into_iter()
        .filter(|e| e.nickname == "alice")
        .map(|e| if e.is_heartbeat() { EventKind::Unknown(-1) } else { e.kind })
        .collect();
    assert_eq!(
        kinds,
        [
            EventKind::UserConnected,
            EventKind::ChatCreated,
            EventKind::UserGotIn,
            EventKind::Unknown(-1),
            EventKind::Message,
        ]
    );
    assert_eq!(sim.message_count(&room), 1);
}

#[tokio::test]
async fn leaving_active_room_purges_it() {
    let sim = SimService::new();
    let mut alice = started(&sim, "alice").await;
    let mut bob = started(&sim, "bob").await;

    let room = alice.create("general").await.expect("create");
    eventually("alice streaming", || sim.is_streaming("alice")).await;
    bob.join(room.clone()).await.expect("bob joins");
    eventually("join notice", || notices(&alice).iter().any(|t| t == "bob joined general")).await;

    alice.send("bye").await.expect("send");
    alice.leave(None).await.expect("leave");

    let view = alice.view();
    assert_eq!(view.view, View::MainMenu);
    assert!(view.active.is_none());
    assert!(view.rooms.is_empty());
    assert!(!notices(&alice).iter().any(|t| t == "bob joined general"));
    assert!(alice.state().rooms.with(|rooms| rooms.room(&room).is_none()));
    assert_eq!(sim.members(&room), ["bob"]);

    eventually("leave announced", || !sim.events_from("alice", EventKind::UserLeft).is_empty())
        .await;
}

#[tokio::test]
async fn invalid_commands_leave_state_unchanged() {
    let sim = SimService::new();
    let mut alice = started(&sim, "alice").await;
    let before = alice.view();

    assert!(matches!(alice.send("hello").await, Err(SessionError::Validation(_))));
    assert!(matches!(
        alice.switch(RoomId::new("nowhere")).await,
        Err(SessionError::Validation(_))
    ));
    assert!(matches!(alice.leave(None).await, Err(SessionError::Validation(_))));
    assert_eq!(alice.view(), before);

    assert_eq!(alice.handle_line("hello").await, Outcome::None);
    assert_eq!(alice.handle_line("/frobnicate").await, Outcome::None);

    let view = alice.view();
    assert_eq!(view.view, View::MainMenu);
    assert!(view.rooms.is_empty());
    let texts = notices(&alice);
    assert!(texts.iter().any(|t| t == "open a room before sending messages"));
    assert!(texts.iter().any(|t| t.starts_with("unknown command /frobnicate")));
}

#[tokio::test]
async fn broken_stream_closes_until_reconnect() {
    let sim = SimService::new();
    let mut alice = started(&sim, "alice").await;
    let room = alice.create("general").await.expect("create");
    eventually("stream registered", || sim.is_streaming("alice")).await;

    sim.break_streams();
    eventually("pump closed", || alice.stream_state() == PumpState::Closed).await;
    assert!(notices(&alice).iter().any(|t| t.starts_with("Connection lost")));

    // Without a stream, sends go through the unary call.
    alice.send("still here").await.expect("unary send");
    assert_eq!(sim.message_count(&room), 1);
    assert_eq!(history(&alice, &room), [(Origin::Sent, "still here".to_owned())]);

    assert_eq!(alice.handle_line("/reconnect").await, Outcome::None);
    assert_eq!(alice.stream_state(), PumpState::Active);
    eventually("stream re-registered", || sim.is_streaming("alice")).await;
    assert_eq!(sim.events_from("alice", EventKind::UserConnected).len(), 2);
}

#[tokio::test]
async fn failed_write_closes_stream_and_keeps_queue_for_reconnect() {
    let sim = SimService::new();
    sim.set_deaf_streams(true);
    let mut alice = started(&sim, "alice").await;
    eventually("pump closed", || alice.stream_state() == PumpState::Closed).await;
    assert!(notices(&alice).iter().any(|t| t.starts_with("Sending failed")));

    // Closed, so the session falls back to unary calls and queues the rest.
    let room = alice.create("general").await.expect("create");
    alice.send("unary").await.expect("send");
    assert_eq!(sim.message_count(&room), 1);
    assert!(sim.events_from("alice", EventKind::ChatCreated).is_empty());

    sim.set_deaf_streams(false);
    alice.reconnect().await.expect("reconnect");
    assert_eq!(alice.stream_state(), PumpState::Active);
    eventually("queued events delivered", || {
        sim.events_from("alice", EventKind::ChatCreated).len() == 1
    })
    .await;

    let first = sim.received_events().into_iter().next().expect("an event");
    assert_eq!(first.kind, EventKind::UserConnected);
}

#[tokio::test]
async fn membership_dropped_by_service_is_forgotten() {
    let sim = SimService::new();
    let mut alice = started(&sim, "alice").await;
    let room = alice.create("general").await.expect("create");

    sim.leave_chat(&room, "alice").await.expect("leave on the service");
    alice.refresh().await.expect("refresh");

    let view = alice.view();
    assert_eq!(view.view, View::MainMenu);
    assert!(view.rooms.is_empty());
    assert!(matches!(alice.switch(room).await, Err(SessionError::Validation(_))));
}

#[tokio::test]
async fn reconnect_while_active_is_rejected() {
    let sim = SimService::new();
    let mut alice = started(&sim, "alice").await;
    assert!(matches!(alice.reconnect().await, Err(SessionError::Validation(_))));
    assert_eq!(alice.stream_state(), PumpState::Active);
}

#[tokio::test]
async fn failed_first_connection_aborts_start() {
    let sim = SimService::new();
    sim.fail_next(SimOp::OpenStream, ServiceError::Transport("refused".into()));

    let mut alice = SessionController::new(sim.clone(), config());
    let result = alice.start("alice").await;
    assert!(matches!(result, Err(SessionError::Transport(_))));
    assert!(alice.view().nickname.is_none());
    assert_eq!(alice.stream_state(), PumpState::Closed);

    alice.start("alice").await.expect("second attempt");
    assert_eq!(alice.stream_state(), PumpState::Active);
}

#[tokio::test]
async fn failed_join_of_known_room_switches_to_it() {
    let sim = SimService::new();
    let mut alice = started(&sim, "alice").await;
    let room = alice.create("general").await.expect("create");
    alice.home();

    sim.fail_next(SimOp::JoinChat, ServiceError::Transport("reset".into()));
    alice.join(room.clone()).await.expect("fallback switch");

    assert_eq!(alice.view().view, View::InRoom(room));
    assert!(notices(&alice).iter().any(|t| t.starts_with("Join failed")));
}

#[tokio::test]
async fn failed_join_of_unknown_room_is_reported() {
    let sim = SimService::new();
    let mut alice = started(&sim, "alice").await;

    assert_eq!(alice.handle_line("/join missing").await, Outcome::None);
    assert_eq!(alice.view().view, View::MainMenu);
    assert!(notices(&alice).iter().any(|t| t.starts_with("Error: service error: not found")));
}

#[tokio::test]
async fn shutdown_announces_every_joined_room() {
    let sim = SimService::new();
    let mut alice = started(&sim, "alice").await;
    alice.create("one").await.expect("create one");
    alice.create("two").await.expect("create two");

    assert_eq!(alice.handle_line("/exit").await, Outcome::Exit);
    assert_eq!(alice.stream_state(), PumpState::Closed);
    eventually("farewells delivered", || {
        sim.events_from("alice", EventKind::UserLeft).len() == 2
    })
    .await;
}

#[tokio::test]
async fn mailboxes_and_colors() {
    let sim = SimService::new();
    let mut alice = started(&sim, "alice").await;
    let room = alice.create("general").await.expect("create");
    sim.join_chat(&room, "bob").await.expect("bob joins");
    sim.send_message(&room, "bob", "hello alice").await.expect("bob sends");
    sim.send_message(&room, "alice", "hello bob").await.expect("alice sends");

    let inbox = alice.inbox().await.expect("inbox");
    assert_eq!(inbox.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), ["hello alice"]);
    let outbox = alice.outbox().await.expect("outbox");
    assert_eq!(outbox.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), ["hello bob"]);

    let colors = alice.colors();
    let names: Vec<&str> = colors.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["alice", "bob"]);

    // Colors never change once assigned.
    let again = alice.colors();
    assert_eq!(colors, again);
}

#[tokio::test]
async fn history_and_status_outcomes() {
    let sim = SimService::new();
    let mut alice = started(&sim, "alice").await;
    let room = alice.create("general").await.expect("create");
    alice.send("first").await.expect("send");

    match alice.handle_line("/history").await {
        Outcome::History { name, messages, .. } => {
            assert_eq!(name, "general");
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].author, "alice");
        },
        other => panic!("unexpected outcome {other:?}"),
    }

    match alice.handle_line("/status").await {
        Outcome::Status(report) => {
            assert_eq!(report.nickname.as_deref(), Some("alice"));
            assert_eq!(report.view, View::InRoom(room.clone()));
            assert_eq!(report.stream, PumpState::Active);
            assert_eq!(report.rooms.len(), 1);
            assert!(report.rooms[0].active);
        },
        other => panic!("unexpected outcome {other:?}"),
    }

    alice.handle_line("/clear-notifications").await;
    assert!(alice.view().notifications.is_empty());
}
