//! Integration tests for the HTTP API.

#![allow(clippy::unwrap_used)]

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::fixtures::manifest_with_sftp;
use common::TestControl;
use hangar_control::api::router;
use hangar_control::{DeploymentRegistry, DeploymentType};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(
    control: &TestControl,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let app = router(control.app_state());
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint() {
    let control = TestControl::new().await;
    let (status, body) = send(&control, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "healthy");
}

#[tokio::test]
async fn deployment_crud() {
    let control = TestControl::new().await;

    let (status, body) = send(
        &control,
        "POST",
        "/deployments",
        Some(json!({"name": "lobby", "type": "scalable"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let created = json_body(&body);
    assert_eq!(created["name"], "lobby");
    assert_eq!(created["type"], "scalable");
    assert_eq!(created["enabled"], true);
    assert_eq!(created["dataDirectory"], "lobby");

    let (status, _) = send(
        &control,
        "POST",
        "/deployments",
        Some(json!({"name": "lobby", "type": "proxy"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &control,
        "POST",
        "/deployments",
        Some(json!({"name": "Not_Valid", "type": "proxy"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json_body(&body)["error"].as_str().unwrap().contains("Not_Valid"));

    let (status, _) = send(
        &control,
        "POST",
        "/deployments",
        Some(json!({"name": "apply", "type": "process"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&control, "GET", "/deployments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body).as_array().unwrap().len(), 2);

    let (status, _) = send(&control, "DELETE", "/deployments/lobby", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&control, "GET", "/deployments/lobby", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manifest_edit_and_toggle() {
    let control = TestControl::new().await;
    control
        .registry
        .create("lobby", DeploymentType::Process)
        .await
        .unwrap();

    let app = router(control.app_state());
    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/deployments/lobby/manifest")
                .body(Body::from("name: lobby\ndataDirectory: worlds\n"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = send(&control, "GET", "/deployments/lobby/manifest", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"name: lobby\ndataDirectory: worlds\n");

    let (status, body) = send(&control, "POST", "/deployments/lobby/disable", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["enabled"], false);

    let (status, body) = send(&control, "POST", "/deployments/lobby/enable", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["enabled"], true);

    let (status, _) = send(&control, "POST", "/deployments/lobby/restart", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn apply_all_reports_summary() {
    let control = TestControl::new().await;

    let (status, body) = send(&control, "POST", "/deployments/apply", None).await;
    assert_eq!(status, StatusCode::OK);
    let result = json_body(&body);
    assert_eq!(result["success"], true);
    assert_eq!(result["summary"]["created"], 1);
    assert!(result.get("error").is_none());
}

#[tokio::test]
async fn session_endpoints() {
    let control = TestControl::new().await;
    control
        .deployment_with_sftp("lobby", DeploymentType::Scalable, 2022)
        .await;

    let (status, body) = send(
        &control,
        "POST",
        "/sessions",
        Some(json!({"deploymentName": "lobby", "userId": "user-42"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let session = json_body(&body);
    assert_eq!(session["status"], "ready");
    assert_eq!(session["sftpCredentials"]["port"], 2022);
    let id = session["id"].as_str().unwrap().to_owned();

    let (status, body) = send(&control, "GET", &format!("/sessions/{id}/validate"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["valid"], true);

    let (status, _) = send(&control, "POST", &format!("/sessions/{id}/activity"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&control, "GET", "/users/user-42/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body).as_array().unwrap().len(), 1);

    let (status, body) = send(&control, "GET", "/deployments/lobby/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)[0]["id"], id.as_str());

    let (status, _) = send(&control, "DELETE", &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&control, "GET", &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_errors_map_to_status() {
    let control = TestControl::new().await;
    control
        .registry
        .create("lobby", DeploymentType::Scalable)
        .await
        .unwrap();
    control
        .registry
        .update_content("lobby", &manifest_with_sftp("lobby", 2022))
        .await
        .unwrap();

    let (status, body) = send(
        &control,
        "POST",
        "/sessions",
        Some(json!({"deploymentName": "lobby", "userId": "user-42"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json_body(&body)["error"]
        .as_str()
        .unwrap()
        .contains("app=lobby"));

    let (status, _) = send(&control, "POST", "/sessions/missing/activity", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
