//! Simulation harness for Murmur.
//!
//! [`SimService`] implements [`murmur_proto::ChatService`] entirely in
//! process: rooms, membership, unread counters and the broadcast behaviour of
//! the chat stream live in memory behind one lock. Tests drive it like a real
//! service and use its inspection and fault-injection hooks as oracles.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_service;

pub use sim_service::{SimOp, SimService};
