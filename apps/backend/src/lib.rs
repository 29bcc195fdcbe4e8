//! Streaming-catalog adapter backend.
//!
//! Core functionality for the usenet streaming-catalog adapter. This
//! library exposes modules for use in integration tests.

use std::sync::Arc;
use std::time::Instant;

use axum::response::Json;
use serde::Serialize;

pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;

use config::Config;
use services::indexer::easynews::EasynewsClient;
use services::{
    IndexerManager, MetadataClient, MountClient, MountHandleCache, NntpPool, NntpPoolRegistry,
    Orchestrator, ResponseCache, StreamProxy, VerifiedNzbCache,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub indexer_manager: Arc<IndexerManager>,
    pub metadata_client: Option<Arc<MetadataClient>>,
    pub easynews_client: Option<Arc<EasynewsClient>>,
    pub response_cache: Arc<ResponseCache>,
    pub verified_nzb_cache: Arc<VerifiedNzbCache>,
    pub mount_handle_cache: Arc<MountHandleCache>,
    pub nntp_pool_registry: Arc<NntpPoolRegistry>,
    pub nntp_pool: Option<Arc<NntpPool>>,
    pub mount_client: Option<Arc<MountClient>>,
    pub orchestrator: Arc<Orchestrator>,
    pub stream_proxy: Arc<StreamProxy>,
    pub http_client: reqwest::Client,
    pub start_time: Instant,
}

impl AppState {
    /// Reference to the configured shared secret, if any. `None` means the
    /// deployment is unauthenticated (every route open).
    pub fn shared_secret(&self) -> Option<&str> {
        self.config.addon_shared_secret.as_deref()
    }

    /// Reference to the metadata client, if TMDB credentials are configured.
    pub fn metadata_client(&self) -> Option<&MetadataClient> {
        self.metadata_client.as_deref()
    }

    /// Reference to the Easynews client, if the adapter enabled it.
    pub fn easynews_client(&self) -> Option<&EasynewsClient> {
        self.easynews_client.as_deref()
    }

    /// Reference to the mount service client, if configured.
    pub fn mount_client(&self) -> Option<&MountClient> {
        self.mount_client.as_deref()
    }
}

#[derive(Serialize)]
pub struct ApiResponse {
    pub status: String,
    pub version: String,
}

pub async fn health_check() -> Json<ApiResponse> {
    Json(ApiResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
