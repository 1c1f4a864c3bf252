//! Service contract for Murmur
//!
//! Types and traits describing the remote chat service the engine talks to:
//! room and message identifiers, the records returned by unary calls, the
//! event vocabulary carried on the bidirectional chat stream, and the
//! [`ChatService`] trait that transports implement.
//!
//! This crate carries no I/O of its own. Transports (a gRPC channel, the
//! in-process simulator in `murmur-harness`, ...) implement [`ChatService`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod event;
pub mod service;
pub mod types;

pub use errors::ServiceError;
pub use event::{EventKind, StreamEvent};
pub use service::{ChatService, ChatStream};
pub use types::{MessageId, RoomId, RoomStats, WireMessage};
