//! Defines the frame protocol of the streaming endpoint.
//!
//! Inbound frames are bare UTF-8 policy names (`grab_pen`). Outbound frames
//! are JSON objects: `{"status": "executed grab_pen"}` on success, or
//! `{"error": "...", "kind": "..."}` when the execution did not happen.

use llami_core::gate::{ExecutionError, ExecutionReport};
use serde::{Deserialize, Serialize};

/// Machine-readable failure category carried by error frames.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownPolicy,
    Overloaded,
    ControlLoopFailure,
    ConnectionFailure,
    GateClosed,
    /// The inbound frame was not a usable policy name.
    InvalidFrame,
}

impl From<&ExecutionError> for ErrorKind {
    fn from(err: &ExecutionError) -> Self {
        match err {
            ExecutionError::UnknownPolicy(_) => ErrorKind::UnknownPolicy,
            ExecutionError::Overloaded { .. } => ErrorKind::Overloaded,
            ExecutionError::ControlLoopFailure { .. } => ErrorKind::ControlLoopFailure,
            ExecutionError::ConnectionFailure(_) => ErrorKind::ConnectionFailure,
            ExecutionError::GateClosed => ErrorKind::GateClosed,
        }
    }
}

/// Frames sent from the server to the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ServerFrame {
    Status { status: String },
    Error { error: String, kind: ErrorKind },
}

impl ServerFrame {
    pub fn executed(report: &ExecutionReport) -> Self {
        ServerFrame::Status {
            status: report.status(),
        }
    }

    pub fn failed(err: &ExecutionError) -> Self {
        ServerFrame::Error {
            error: err.to_string(),
            kind: err.into(),
        }
    }

    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        ServerFrame::Error {
            error: reason.into(),
            kind: ErrorKind::InvalidFrame,
        }
    }
}

/// Extracts the policy name from an inbound text frame.
pub fn parse_policy_name(text: &str) -> Option<&str> {
    let name = text.trim();
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_frame_shape() {
        let report = ExecutionReport {
            policy: "grab_pen".to_string(),
            correlation: "ws-1#1".to_string(),
            elapsed: Duration::from_secs(1),
        };
        let json = serde_json::to_string(&ServerFrame::executed(&report)).unwrap();
        assert_eq!(json, r#"{"status":"executed grab_pen"}"#);
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = ServerFrame::failed(&ExecutionError::UnknownPolicy("grab_spoon".into()));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["kind"], "unknown_policy");
        assert_eq!(json["error"], "Unknown policy 'grab_spoon'");
    }

    #[test]
    fn test_frames_parse_back() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"error":"queue full","kind":"overloaded"}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Error {
                error: "queue full".into(),
                kind: ErrorKind::Overloaded
            }
        );
    }

    #[test]
    fn test_parse_policy_name_trims_whitespace() {
        assert_eq!(parse_policy_name(" grab_cup\n"), Some("grab_cup"));
        assert_eq!(parse_policy_name("   "), None);
    }
}
