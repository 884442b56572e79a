//! Request handlers for sync sessions.

mod sync;
mod websocket;

pub use sync::*;
pub use websocket::*;
