//! Axum Handlers for the REST API
//!
//! This module contains the request/response ingress of the dispatcher: the
//! natural-language resolve-and-execute path, direct execution of a named
//! policy, and a few read-only views. It uses `utoipa` doc comments to
//! generate OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use llami_core::{completion::CompletionError, gate::ExecutionError, registry::RegistryError};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    models::{
        ErrorResponse, GateStatusResponse, PolicySummary, ResolvePayload, ResolveResponse,
        StatusResponse,
    },
    state::AppState,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// The completion service could not be reached.
    BadGateway(String),
    /// The gate cannot take more work right now.
    ServiceUnavailable(String),
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::BadGateway(message) => {
                warn!("Bad Gateway: {}", message);
                (StatusCode::BAD_GATEWAY, message)
            }
            ApiError::ServiceUnavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
            ApiError::InternalServerError(message) => {
                error!("Internal Server Error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}

impl From<CompletionError> for ApiError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::Transport(_) | CompletionError::Status(_) => {
                ApiError::BadGateway(err.to_string())
            }
            CompletionError::Malformed(_) => ApiError::InternalServerError(err.to_string()),
        }
    }
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::UnknownPolicy(_) => ApiError::NotFound(err.to_string()),
            ExecutionError::Overloaded { .. } | ExecutionError::GateClosed => {
                ApiError::ServiceUnavailable(err.to_string())
            }
            ExecutionError::ControlLoopFailure { .. } | ExecutionError::ConnectionFailure(_) => {
                ApiError::InternalServerError(err.to_string())
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            other => ApiError::InternalServerError(other.to_string()),
        }
    }
}

fn correlation_token() -> String {
    format!("http-{}", Uuid::new_v4())
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = StatusResponse)
    )
)]
pub async fn health() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
    })
}

/// Resolve a natural-language instruction to a policy and execute it.
///
/// Not idempotent: every call may move the arm.
#[utoipa::path(
    post,
    path = "/resolve",
    request_body = ResolvePayload,
    responses(
        (status = 200, description = "Policy resolved and executed", body = ResolveResponse),
        (status = 400, description = "Empty utterance", body = ErrorResponse),
        (status = 500, description = "Malformed completion or execution failure", body = ErrorResponse),
        (status = 502, description = "Completion service unreachable", body = ErrorResponse),
        (status = 503, description = "Execution queue full", body = ErrorResponse)
    )
)]
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ResolvePayload>,
) -> Result<Json<ResolveResponse>, ApiError> {
    if payload.utterance.trim().is_empty() {
        return Err(ApiError::BadRequest("utterance must not be empty".to_string()));
    }

    let registry = state.registry.snapshot();
    let resolution = state.resolver.resolve(&payload.utterance, &registry).await?;
    let resolved = resolution.extraction.is_resolved();
    let policy = resolution.extraction.into_policy();

    let report = state.gate.execute(&policy, correlation_token()).await?;
    info!(%policy, resolved, "Resolve request completed");

    Ok(Json(ResolveResponse {
        policy,
        resolved,
        status: report.status(),
        completion: resolution.completion,
    }))
}

/// Execute a policy by name, skipping language-model resolution.
#[utoipa::path(
    post,
    path = "/execute/{policy_name}",
    responses(
        (status = 200, description = "Policy executed", body = StatusResponse),
        (status = 404, description = "Unknown policy", body = ErrorResponse),
        (status = 500, description = "Execution failure", body = ErrorResponse),
        (status = 503, description = "Execution queue full", body = ErrorResponse)
    ),
    params(
        ("policy_name" = String, Path, description = "Registered policy name, e.g. grab_cup")
    )
)]
pub async fn execute_policy(
    State(state): State<Arc<AppState>>,
    Path(policy_name): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let report = state
        .gate
        .execute(&policy_name, correlation_token())
        .await?;
    Ok(Json(StatusResponse {
        status: format!("executing {}", report.policy),
    }))
}

/// List registered policies in registry order.
#[utoipa::path(
    get,
    path = "/policies",
    responses(
        (status = 200, description = "Registered policies", body = [PolicySummary])
    )
)]
pub async fn list_policies(State(state): State<Arc<AppState>>) -> Json<Vec<PolicySummary>> {
    let registry = state.registry.snapshot();
    Json(registry.iter().map(PolicySummary::from).collect())
}

/// Re-read the policy directory and swap in the new registry.
#[utoipa::path(
    post,
    path = "/policies/reload",
    responses(
        (status = 200, description = "Registry reloaded", body = [PolicySummary]),
        (status = 500, description = "Reload failed; previous registry kept", body = ErrorResponse)
    )
)]
pub async fn reload_policies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PolicySummary>>, ApiError> {
    let registry = state.registry.clone();
    let reloaded = tokio::task::spawn_blocking(move || registry.reload())
        .await
        .map_err(|e| ApiError::InternalServerError(e.to_string()))??;
    info!(count = reloaded.len(), "Policy registry reloaded");
    Ok(Json(reloaded.iter().map(PolicySummary::from).collect()))
}

/// Report the execution gate's state.
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Gate status", body = GateStatusResponse)
    )
)]
pub async fn gate_status(State(state): State<Arc<AppState>>) -> Json<GateStatusResponse> {
    Json(state.gate.status().into())
}
