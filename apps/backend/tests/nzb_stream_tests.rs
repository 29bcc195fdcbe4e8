//! Integration tests for `/nzb/stream`, the signed playback proxy.

mod common;

use common::{TestApp, TEST_SECRET};

#[tokio::test]
async fn test_invalid_signature_serves_fallback_not_error() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .get(&format!("/nzb/stream?token={TEST_SECRET}&downloadUrl=http://example.test/a.nzb&exp=9999999999&sig=deadbeef"))
        .await;

    // A bad signature never surfaces an HTTP error to the player — it gets
    // a fallback video response instead.
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "video/mp4");
    assert!(response.header("x-nzbdav-failure").to_str().unwrap().contains("signature"));
}

#[tokio::test]
async fn test_expired_signature_serves_fallback() {
    let app = TestApp::new().await;
    let response = app
        .server()
        .get(&format!("/nzb/stream?token={TEST_SECRET}&downloadUrl=http://example.test/a.nzb&exp=1&sig=deadbeef"))
        .await;

    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "video/mp4");
}

#[tokio::test]
async fn test_missing_mount_client_serves_fallback_even_with_valid_signature() {
    // No NZBDAV_URL configured means `state.mount_client` is `None`; a
    // syntactically valid-looking request still can't reach a mount.
    let app = TestApp::new().await;
    let response = app
        .server()
        .get(&format!(
            "/nzb/stream?token={TEST_SECRET}&downloadUrl=http://example.test/a.nzb&exp=9999999999&sig=irrelevant-because-checked-first"
        ))
        .await;

    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "video/mp4");
}

#[tokio::test]
async fn test_nzb_stream_requires_token() {
    let app = TestApp::new().await;
    let response = app.server().get("/nzb/stream?downloadUrl=x&exp=0&sig=x").await;
    response.assert_status_unauthorized();
}
