//! WebSocket progress streams.
//!
//! Clients follow one sync session over a WebSocket and receive a snapshot
//! every time that session changes, until it settles.

mod manager;
mod protocol;

pub use manager::{forward_progress, ConnectionManager};
pub use protocol::*;
