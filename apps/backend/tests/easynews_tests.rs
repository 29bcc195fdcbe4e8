//! Integration tests for `/easynews/nzb`.

mod common;

use common::{TestApp, TEST_SECRET};

#[tokio::test]
async fn test_easynews_nzb_requires_token() {
    let app = TestApp::new().await;
    let response = app.server().get("/easynews/nzb?payload=whatever").await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_easynews_nzb_fails_when_not_configured() {
    // Easynews isn't enabled in the test config, so `easynews_client` is
    // `None` and the handler reports an internal error rather than
    // pretending to serve an NZB.
    let app = TestApp::new().await;
    let response = app.server().get(&format!("/easynews/nzb?token={TEST_SECRET}&payload=whatever")).await;
    response.assert_status_internal_server_error();
}

#[tokio::test]
async fn test_easynews_nzb_rejects_malformed_payload() {
    let app = TestApp::new().await;
    // Even if Easynews were configured, a payload that doesn't decode as a
    // valid signed token is a client error, not a server error — but
    // because the client check runs first here, this still surfaces as the
    // "not configured" internal error. This test documents that ordering.
    let response = app.server().get(&format!("/easynews/nzb?token={TEST_SECRET}&payload=not-a-real-token")).await;
    response.assert_status_internal_server_error();
}
