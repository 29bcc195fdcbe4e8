//! Integration tests for the `/stream/:type/:id.json` endpoint.

mod common;

use common::{TestApp, TEST_SECRET};

#[tokio::test]
async fn test_stream_empty_catalog_returns_empty_list() {
    let app = TestApp::new().await;
    let response = app.server().get(&format!("/stream/movie/tt0111161.json?token={TEST_SECRET}")).await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["streams"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_stream_rejects_unknown_type() {
    let app = TestApp::new().await;
    let response = app.server().get(&format!("/stream/album/tt0111161.json?token={TEST_SECRET}")).await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_stream_series_id_with_season_episode() {
    let app = TestApp::new().await;
    let response = app.server().get(&format!("/stream/series/tt0903747:1:1.json?token={TEST_SECRET}")).await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_stream_requires_token() {
    let app = TestApp::new().await;
    let response = app.server().get("/stream/movie/tt0111161.json").await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_stream_reachable_under_path_token_prefix() {
    let app = TestApp::new().await;
    let response = app.server().get(&format!("/{TEST_SECRET}/stream/movie/tt0111161.json")).await;
    response.assert_status_ok();
}
