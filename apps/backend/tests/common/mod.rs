//! Test infrastructure for the catalog adapter's integration tests.
//!
//! Provides a `TestApp` wrapper around `axum_test::TestServer` built from
//! the same `AppState`/router shape `main.rs` assembles, minus the
//! optional collaborators (NNTP pool, mount client, metadata, Easynews)
//! that integration tests don't need network access for.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{middleware as axum_mw, routing::get, Router};
use axum_test::TestServer;

use backend::config::Config;
use backend::services::indexer::IndexerManager;
use backend::services::{MountHandleCache, Orchestrator, ResponseCache, StreamProxy, VerifiedNzbCache};
use backend::{api, middleware, AppState};

pub const TEST_SECRET: &str = "test-shared-secret";

pub struct TestApp {
    server: TestServer,
}

impl TestApp {
    /// Builds a test app with the shared secret set and no configured
    /// indexers — enough to exercise routing, auth, and the empty-result
    /// path of the orchestrator without reaching the network.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(mutate: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::load_from("nonexistent.json").expect("default config");
        config.addon_shared_secret = Some(TEST_SECRET.to_string());
        config.addon_base_url = "http://localhost:8080".to_string();
        mutate(&mut config);
        let config = Arc::new(config);

        let indexer_manager = IndexerManager::new_shared(Vec::new());
        let response_cache = Arc::new(ResponseCache::new(1_000, 10 * 1024 * 1024, Duration::from_secs(3600)));
        let verified_nzb_cache = Arc::new(VerifiedNzbCache::new(10 * 1024 * 1024, Duration::from_secs(3600)));
        let mount_handle_cache = Arc::new(MountHandleCache::new(Duration::from_secs(600)));

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&config),
            Arc::clone(&indexer_manager),
            None,
            Arc::clone(&response_cache),
            Arc::clone(&verified_nzb_cache),
            Arc::clone(&mount_handle_cache),
            None,
            None,
        ));

        let state = AppState {
            config: Arc::clone(&config),
            indexer_manager,
            metadata_client: None,
            easynews_client: None,
            response_cache,
            verified_nzb_cache,
            mount_handle_cache,
            nntp_pool_registry: Arc::new(backend::services::NntpPoolRegistry::new()),
            nntp_pool: None,
            mount_client: None,
            orchestrator,
            stream_proxy: Arc::new(StreamProxy::new()),
            http_client: reqwest::Client::new(),
            start_time: Instant::now(),
        };

        let app = Self::build_router(state);
        let server = TestServer::new(app).expect("failed to create test server");

        Self { server }
    }

    /// Mirrors the route assembly in `main.rs`: `/health` open, everything
    /// else reachable both at the root and under `/:token`, gated by the
    /// shared-secret middleware.
    fn build_router(state: AppState) -> Router {
        let authenticated = Router::new()
            .merge(api::routes())
            .nest("/:token", api::routes())
            .route_layer(axum_mw::from_fn_with_state(state.clone(), middleware::shared_secret_middleware));

        Router::new()
            .route("/health", get(backend::health_check))
            .merge(authenticated)
            .with_state(state)
    }

    pub fn server(&self) -> &TestServer {
        &self.server
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_creation() {
        let _app = TestApp::new().await;
    }
}
