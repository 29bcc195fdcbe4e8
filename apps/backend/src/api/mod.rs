//! HTTP route handlers for the streaming-catalog adapter.

pub mod easynews;
pub mod manifest;
pub mod nzb_stream;
pub mod stream;

use axum::routing::get;
use axum::Router;

use crate::AppState;

/// The authenticated route set — mounted both at the root and under
/// `/:token` by the caller, per spec's "token prefix optional".
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/manifest.json", get(manifest::manifest))
        .route("/stream/:kind/:id", get(stream::get_streams))
        .route("/nzb/stream", get(nzb_stream::proxy_stream).head(nzb_stream::proxy_stream))
        .route("/easynews/nzb", get(easynews::fetch_nzb))
}
