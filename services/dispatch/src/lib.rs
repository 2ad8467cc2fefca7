//! Llami Dispatch Service Library Crate
//!
//! This library contains the ingress of the robot dispatcher: configuration,
//! application state, HTTP handlers, the streaming WebSocket session and the
//! router. The `dispatch` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
