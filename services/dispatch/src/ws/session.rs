//! Manages the WebSocket connection lifecycle for a streaming session.
//!
//! Each session is a strict request-then-reply cycle: a frame is read, its
//! policy is handed to the execution gate, and the outcome frame is written
//! before the next frame is read. Sessions never run executions themselves;
//! cross-session ordering is the gate's FIFO order.

use super::protocol::{self, ServerFrame};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Entry point for an individual WebSocket connection.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    tracing::Span::current().record("session_id", &session_id.to_string());
    info!("New streaming session.");

    if let Err(e) = run_session(socket, &state, session_id).await {
        error!(error = ?e, "Streaming session terminated with error.");
    }
    info!("Streaming session finished.");
}

/// The read, dispatch, write loop of one session.
async fn run_session(mut socket: WebSocket, state: &AppState, session_id: Uuid) -> Result<()> {
    let mut sequence: u64 = 0;

    while let Some(msg_result) = socket.recv().await {
        let text = match msg_result {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    send_frame(
                        &mut socket,
                        ServerFrame::invalid_frame("frame is not valid UTF-8"),
                    )
                    .await?;
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                info!("Client sent close frame. Shutting down session.");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Err(e) => {
                error!("Error receiving from client WebSocket: {:?}", e);
                break;
            }
        };

        let Some(policy) = protocol::parse_policy_name(&text) else {
            send_frame(&mut socket, ServerFrame::invalid_frame("empty policy name")).await?;
            continue;
        };

        sequence += 1;
        let correlation = format!("ws-{}#{}", session_id, sequence);
        debug!(%policy, %correlation, "Dispatching policy");

        match state.gate.execute(policy, correlation).await {
            Ok(report) => send_frame(&mut socket, ServerFrame::executed(&report)).await?,
            Err(e) => {
                send_frame(&mut socket, ServerFrame::failed(&e)).await?;
                if e.is_connection_fatal() {
                    warn!(error = %e, "Robot unavailable; closing session.");
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Serializes and sends a `ServerFrame` to the client.
async fn send_frame(socket: &mut WebSocket, frame: ServerFrame) -> Result<()> {
    let serialized = serde_json::to_string(&frame)?;
    socket.send(Message::Text(serialized.into())).await?;
    Ok(())
}
