//! Focused tests on the shared-secret middleware's token-resolution
//! priority (path segment, then query param, then header) and the
//! reserved-segment guard that keeps real routes from being misread as a
//! path token.

mod common;

use common::{TestApp, TEST_SECRET};

#[tokio::test]
async fn test_query_token_wins_when_path_has_no_token_segment() {
    let app = TestApp::new().await;
    let response = app.server().get(&format!("/manifest.json?token={TEST_SECRET}")).await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_empty_query_token_is_rejected() {
    let app = TestApp::new().await;
    let response = app.server().get("/manifest.json?token=").await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_nzb_stream_route_is_reserved_and_not_mistaken_for_a_token() {
    let app = TestApp::new().await;
    // No token supplied anywhere — "nzb" must not be treated as a path token
    // that grants access to whatever follows it.
    let response = app.server().get("/nzb/stream?downloadUrl=x&exp=0&sig=bad").await;
    response.assert_status_unauthorized();
}
