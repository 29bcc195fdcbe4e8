//! Integration tests for the manifest endpoint and the shared-secret gate
//! that fronts every route except `/health`.

mod common;

use common::{TestApp, TEST_SECRET};

#[tokio::test]
async fn test_health_is_unauthenticated() {
    let app = TestApp::new().await;
    let response = app.server().get("/health").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_manifest_requires_token() {
    let app = TestApp::new().await;
    let response = app.server().get("/manifest.json").await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_manifest_accepts_query_token() {
    let app = TestApp::new().await;
    let response = app.server().get(&format!("/manifest.json?token={TEST_SECRET}")).await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["id"], "community.usenet-catalog-adapter");
    assert_eq!(body["resources"][0], "stream");
}

#[tokio::test]
async fn test_manifest_accepts_header_token() {
    let app = TestApp::new().await;
    let response = app.server().get("/manifest.json").add_header("X-Addon-Token", TEST_SECRET).await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_manifest_accepts_path_token() {
    let app = TestApp::new().await;
    let response = app.server().get(&format!("/{TEST_SECRET}/manifest.json")).await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_manifest_rejects_wrong_token() {
    let app = TestApp::new().await;
    let response = app.server().get("/manifest.json?token=wrong").await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_manifest_is_open_when_no_secret_configured() {
    let app = TestApp::with_config(|config| config.addon_shared_secret = None).await;
    let response = app.server().get("/manifest.json").await;
    response.assert_status_ok();
}
