//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the dispatcher,
//! including the REST API, the streaming WebSocket endpoint, and OpenAPI
//! documentation.

use crate::{
    handlers,
    models::{
        ErrorResponse, GateStatusResponse, PolicySummary, ResolvePayload, ResolveResponse,
        StatusResponse,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::resolve,
        handlers::execute_policy,
        handlers::list_policies,
        handlers::reload_policies,
        handlers::gate_status,
    ),
    components(
        schemas(ResolvePayload, ResolveResponse, StatusResponse, PolicySummary, GateStatusResponse, ErrorResponse)
    ),
    tags(
        (name = "Llami Dispatch API", description = "Voice-command dispatch to trained robot policies")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/health", get(handlers::health))
        .route("/resolve", post(handlers::resolve))
        .route("/execute/{policy_name}", post(handlers::execute_policy))
        .route("/policies", get(handlers::list_policies))
        .route("/policies/reload", post(handlers::reload_policies))
        .route("/status", get(handlers::gate_status))
        .route("/ws", get(ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

/// Renders the dispatcher's OpenAPI document as pretty-printed JSON.
pub fn openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_openapi_document_lists_dispatch_routes() {
        let doc: Value = serde_json::from_str(&openapi_json().unwrap()).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        for route in [
            "/health",
            "/resolve",
            "/execute/{policy_name}",
            "/policies",
            "/policies/reload",
            "/status",
        ] {
            assert!(paths.contains_key(route), "missing {}", route);
        }
        assert!(doc["components"]["schemas"]["ResolveResponse"].is_object());
    }
}
