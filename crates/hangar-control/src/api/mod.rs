//! HTTP API for the control service.
//!
//! Provides endpoints for:
//! - Deployment management (create, list, toggle, restart, manifest edits)
//! - File-edit sessions (create, inspect, keep alive, validate, terminate)
//! - Health checks

mod deployments;
mod sessions;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::error::ControlError;
use crate::registry::DeploymentRegistry;
use crate::session::SessionManager;

pub use deployments::CreateDeploymentRequest;
pub use sessions::{CreateSessionRequest, ValidateSessionResponse};

/// Shared application state for the control service.
#[derive(Clone)]
pub struct AppState {
    /// Deployment registry.
    pub deployments: Arc<dyn DeploymentRegistry>,
    /// File-edit session manager.
    pub sessions: Arc<SessionManager>,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Deployments
        .route(
            "/deployments",
            get(deployments::list_deployments).post(deployments::create_deployment),
        )
        .route("/deployments/apply", post(deployments::apply_all))
        .route(
            "/deployments/{name}",
            get(deployments::get_deployment).delete(deployments::delete_deployment),
        )
        .route(
            "/deployments/{name}/restart",
            post(deployments::restart_deployment),
        )
        .route(
            "/deployments/{name}/manifest",
            get(deployments::get_manifest).put(deployments::update_manifest),
        )
        .route(
            "/deployments/{name}/enable",
            post(deployments::enable_deployment),
        )
        .route(
            "/deployments/{name}/disable",
            post(deployments::disable_deployment),
        )
        .route(
            "/deployments/{name}/sessions",
            get(sessions::list_deployment_sessions),
        )
        // Sessions
        .route("/sessions", post(sessions::create_session))
        .route(
            "/sessions/{id}",
            get(sessions::get_session).delete(sessions::terminate_session),
        )
        .route("/sessions/{id}/activity", post(sessions::refresh_activity))
        .route("/sessions/{id}/validate", get(sessions::validate_session))
        .route("/users/{id}/sessions", get(sessions::list_user_sessions))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// Health response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// Handler error: status plus JSON body.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

const fn error_to_status(error: &ControlError) -> StatusCode {
    if error.is_not_found() {
        return StatusCode::NOT_FOUND;
    }
    match error {
        ControlError::AlreadyExists(_) => StatusCode::CONFLICT,
        ControlError::InvalidName(_) | ControlError::Manifest { .. } => StatusCode::BAD_REQUEST,
        ControlError::PodNotReady { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(error: ControlError) -> ApiError {
    let status = error_to_status(&error);
    if status.is_server_error() {
        tracing::error!(error = %error, "request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            error_to_status(&ControlError::SessionNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_to_status(&ControlError::NoSftpPort("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_to_status(&ControlError::AlreadyExists("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_to_status(&ControlError::InvalidName("X".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_to_status(&ControlError::PodNotReady {
                pod: "p".into(),
                reason: "r".into()
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            error_to_status(&ControlError::apply_failed("s", "boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
