//! File-edit session endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::FileEditSession;

use super::{api_error, ApiError, AppState};

/// Request to open a file-edit session.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Deployment whose volume to mount.
    pub deployment_name: String,
    /// Requesting user.
    pub user_id: String,
}

/// Response for session validation.
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateSessionResponse {
    /// Whether the session is usable right now.
    pub valid: bool,
}

/// Open a session. Returns once the pod is ready.
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<FileEditSession>), ApiError> {
    info!(
        deployment = %request.deployment_name,
        user_id = %request.user_id,
        "creating file session via API"
    );

    state
        .sessions
        .create_session(&request.deployment_name, &request.user_id)
        .await
        .map(|session| (StatusCode::CREATED, Json(session)))
        .map_err(api_error)
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileEditSession>, ApiError> {
    state
        .sessions
        .get_session(&id)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn terminate_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .sessions
        .terminate_session(&id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(api_error)
}

pub async fn refresh_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .sessions
        .refresh_activity(&id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(api_error)
}

pub async fn validate_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ValidateSessionResponse>, ApiError> {
    state
        .sessions
        .validate_session(&id)
        .await
        .map(|valid| Json(ValidateSessionResponse { valid }))
        .map_err(api_error)
}

pub async fn list_deployment_sessions(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<FileEditSession>>, ApiError> {
    state
        .sessions
        .list_for_deployment(&name)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn list_user_sessions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<FileEditSession>>, ApiError> {
    state
        .sessions
        .list_for_user(&id)
        .await
        .map(Json)
        .map_err(api_error)
}
