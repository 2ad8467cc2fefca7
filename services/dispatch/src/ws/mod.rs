//! Streaming Session
//!
//! A persistent WebSocket channel where every inbound text frame names a
//! policy to run and every outbound frame reports its outcome.
//!
//! - `protocol`: the frame formats in both directions.
//! - `session`: the per-connection read, dispatch, write loop.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
