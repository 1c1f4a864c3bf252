//! Line-oriented frontend for the Murmur chat engine.
//!
//! Reads commands from stdin, draws [`murmur_app::ViewModel`] frames as plain
//! text on stdout, and logs to stderr.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod input;
pub mod render;

pub use input::spawn_line_reader;
pub use render::{PlainRenderer, RenderError};
