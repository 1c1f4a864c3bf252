//! Interactive loop connecting input lines, the session and a renderer.

use murmur_proto::ChatService;
use tokio::sync::mpsc;

use crate::{
    renderer::Renderer,
    session::SessionController,
    view::Outcome,
};

/// Runs a started session until `/exit` or the end of input.
pub struct Runtime<S, R> {
    session: SessionController<S>,
    renderer: R,
}

impl<S: ChatService, R: Renderer> Runtime<S, R> {
    /// Pair a session with a renderer.
    pub fn new(session: SessionController<S>, renderer: R) -> Self {
        Self { session, renderer }
    }

    /// Handle lines from `input` and redraw on every state change.
    ///
    /// Redraw requests raised by background tasks while a command runs are
    /// coalesced into one frame. Closing `input` shuts the session down like
    /// `/exit`.
    ///
    /// # Errors
    ///
    /// Returns the renderer's error. The session is shut down first.
    pub async fn run(mut self, mut input: mpsc::Receiver<String>) -> Result<R, R::Error> {
        let mut redraw = self.session.subscribe();
        if let Err(e) = self.renderer.render(&self.session.view()) {
            self.session.shutdown().await;
            return Err(e);
        }

        loop {
            let step = tokio::select! {
                line = input.recv() => match line {
                    Some(line) => self.handle(&line).await,
                    None => {
                        self.session.shutdown().await;
                        break;
                    },
                },
                changed = redraw.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.renderer.render(&self.session.view()).map(|()| true)
                },
            };

            match step {
                Ok(true) => {},
                Ok(false) => break,
                Err(e) => {
                    self.session.shutdown().await;
                    return Err(e);
                },
            }
        }

        tracing::debug!("runtime finished");
        Ok(self.renderer)
    }

    /// Returns `Ok(false)` once the session has exited.
    async fn handle(&mut self, line: &str) -> Result<bool, R::Error> {
        let outcome = self.session.handle_line(line).await;
        match outcome {
            Outcome::None => Ok(true),
            Outcome::Exit => {
                self.renderer.show(&outcome)?;
                Ok(false)
            },
            _ => self.renderer.show(&outcome).map(|()| true),
        }
    }
}
