//! Renderer seam.
//!
//! The engine performs no screen I/O. A frontend implements [`Renderer`] to
//! draw [`ViewModel`] snapshots and command output however it likes.

use crate::view::{Outcome, ViewModel};

/// Draws engine state.
///
/// # Implementations
///
/// - **CLI**: plain lines on stdout
/// - **Tests**: records every frame for assertions
pub trait Renderer {
    /// Frontend-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Draw a full frame.
    ///
    /// # Errors
    ///
    /// Returns an error if drawing fails.
    fn render(&mut self, view: &ViewModel) -> Result<(), Self::Error>;

    /// Show the output of a command. Never called with [`Outcome::None`].
    ///
    /// # Errors
    ///
    /// Returns an error if drawing fails.
    fn show(&mut self, outcome: &Outcome) -> Result<(), Self::Error>;
}
