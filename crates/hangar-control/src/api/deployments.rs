//! Deployment management endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::error::ControlError;
use crate::types::{Deployment, DeploymentType, InfraApplyResult};

use super::{api_error, ApiError, AppState};

/// Request to create a new deployment.
#[derive(Debug, Deserialize)]
pub struct CreateDeploymentRequest {
    /// Deployment name, a DNS label.
    pub name: String,
    /// Deployment type identifier.
    #[serde(rename = "type")]
    pub deployment_type: DeploymentType,
}

/// List every registered deployment.
pub async fn list_deployments(State(state): State<AppState>) -> Json<Vec<Deployment>> {
    Json(state.deployments.list().await)
}

/// Create a deployment from its type's template.
pub async fn create_deployment(
    State(state): State<AppState>,
    Json(request): Json<CreateDeploymentRequest>,
) -> Result<(StatusCode, Json<Deployment>), ApiError> {
    info!(
        deployment = %request.name,
        r#type = %request.deployment_type,
        "creating deployment via API"
    );

    state
        .deployments
        .create(&request.name, request.deployment_type)
        .await
        .map(|deployment| (StatusCode::CREATED, Json(deployment)))
        .map_err(api_error)
}

/// Get a deployment by name.
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Deployment>, ApiError> {
    state
        .deployments
        .get_by_name(&name)
        .await
        .map(Json)
        .ok_or_else(|| api_error(ControlError::DeploymentNotFound(name)))
}

/// Delete a deployment and destroy its resources.
pub async fn delete_deployment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    info!(deployment = %name, "deleting deployment via API");
    state
        .deployments
        .delete(&name)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(api_error)
}

/// Restart a deployment. Returns once both phases completed.
pub async fn restart_deployment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .deployments
        .restart(&name)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(api_error)
}

/// Raw manifest text.
pub async fn get_manifest(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<String, ApiError> {
    state
        .deployments
        .get_content(&name)
        .await
        .map_err(api_error)
}

/// Replace the manifest text and apply it.
pub async fn update_manifest(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> Result<Json<Deployment>, ApiError> {
    state
        .deployments
        .update_content(&name, &body)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn enable_deployment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Deployment>, ApiError> {
    set_enabled(&state, &name, true).await
}

pub async fn disable_deployment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Deployment>, ApiError> {
    set_enabled(&state, &name, false).await
}

async fn set_enabled(
    state: &AppState,
    name: &str,
    enabled: bool,
) -> Result<Json<Deployment>, ApiError> {
    state
        .deployments
        .set_enabled(name, enabled)
        .await
        .map(Json)
        .map_err(api_error)
}

/// Reconcile every enabled manifest.
pub async fn apply_all(State(state): State<AppState>) -> (StatusCode, Json<InfraApplyResult>) {
    let result = state.deployments.run_apply_all().await;
    let status = if result.success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(result))
}
