//! Runtime loop tests with a recording renderer.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::{convert::Infallible, time::Duration};

use murmur_app::{EngineConfig, Outcome, Renderer, Runtime, SessionController, View, ViewModel};
use murmur_harness::SimService;
use tokio::sync::mpsc;

#[derive(Default)]
struct RecordingRenderer {
    frames: Vec<ViewModel>,
    shown: Vec<Outcome>,
}

impl Renderer for RecordingRenderer {
    type Error = Infallible;

    fn render(&mut self, view: &ViewModel) -> Result<(), Self::Error> {
        self.frames.push(view.clone());
        Ok(())
    }

    fn show(&mut self, outcome: &Outcome) -> Result<(), Self::Error> {
        self.shown.push(outcome.clone());
        Ok(())
    }
}

async fn started(sim: &SimService) -> SessionController<SimService> {
    let config =
        EngineConfig { poll_interval: Duration::from_secs(3600), ..EngineConfig::default() };
    let mut session = SessionController::new(sim.clone(), config);
    session.start("alice").await.expect("start");
    session
}

#[tokio::test]
async fn lines_drive_the_session_until_exit() {
    let sim = SimService::new();
    let session = started(&sim).await;

    let (tx, rx) = mpsc::channel(8);
    for line in ["/create general", "hello", "/status", "/exit", "never handled"] {
        tx.send(line.to_owned()).await.expect("queue line");
    }

    let renderer = Runtime::new(session, RecordingRenderer::default())
        .run(rx)
        .await
        .expect("runtime");

    match renderer.shown.as_slice() {
        [Outcome::Status(report), Outcome::Exit] => {
            assert!(matches!(report.view, View::InRoom(_)));
            assert_eq!(report.rooms.len(), 1);
            assert_eq!(report.rooms[0].messages, 1);
        },
        other => panic!("unexpected outcomes {other:?}"),
    }

    let first = renderer.frames.first().expect("initial frame");
    assert_eq!(first.nickname.as_deref(), Some("alice"));
}

#[tokio::test]
async fn closed_input_shuts_down() {
    let sim = SimService::new();
    let session = started(&sim).await;

    let (tx, rx) = mpsc::channel(1);
    drop(tx);

    let renderer = Runtime::new(session, RecordingRenderer::default())
        .run(rx)
        .await
        .expect("runtime");
    assert!(renderer.shown.is_empty());
    assert!(!renderer.frames.is_empty());
}
