//! API Models
//!
//! Request and response bodies for the HTTP surface. Every type derives
//! `utoipa::ToSchema` so it appears in the generated OpenAPI document.

use llami_core::{gate::GateStatus, registry::PolicyDescriptor};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema, Debug)]
pub struct ResolvePayload {
    /// Transcribed operator instruction.
    #[schema(example = "could you hand me the cup please")]
    pub utterance: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct ResolveResponse {
    #[schema(example = "grab_cup")]
    pub policy: String,
    /// `false` when no policy matched and the fallback policy ran instead.
    pub resolved: bool,
    #[schema(example = "executed grab_cup")]
    pub status: String,
    /// Raw text produced by the completion service.
    pub completion: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct StatusResponse {
    #[schema(example = "executing grab_cup")]
    pub status: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct PolicySummary {
    #[schema(example = "grab_cup")]
    pub name: String,
    #[schema(example = "Can grab cups from the table")]
    pub description: String,
    pub model_reference: String,
    pub control_time_s: f64,
}

impl From<&PolicyDescriptor> for PolicySummary {
    fn from(policy: &PolicyDescriptor) -> Self {
        Self {
            name: policy.name.clone(),
            description: policy.description.clone(),
            model_reference: policy.model_reference.clone(),
            control_time_s: policy.control_duration.as_secs_f64(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct GateStatusResponse {
    pub connected: bool,
    /// Whether a policy is executing right now.
    pub active: bool,
    /// Requests waiting behind the running execution.
    pub queued: usize,
    pub max_queue_depth: usize,
}

impl From<GateStatus> for GateStatusResponse {
    fn from(status: GateStatus) -> Self {
        Self {
            connected: status.connected,
            active: status.active,
            queued: status.queued,
            max_queue_depth: status.max_queue_depth,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub message: String,
}
