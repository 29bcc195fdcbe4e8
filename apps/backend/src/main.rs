use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{middleware as axum_mw, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod config;
mod error;
mod middleware;
mod models;
mod services;

use backend::{health_check, AppState};
use config::Config;
use services::indexer::aggregator::AggregatorClient;
use services::indexer::easynews::EasynewsClient;
use services::indexer::newznab::NewznabClient;
use services::indexer::IndexerClient;
use services::{
    IndexerManager, MetadataClient, MountClient, MountHandleCache, NntpPoolConfig,
    NntpPoolRegistry, Orchestrator, ResponseCache, StreamProxy, VerifiedNzbCache,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("backend=debug,tower_http=debug,axum=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_indexer_manager(config: &Config) -> Arc<IndexerManager> {
    let mut clients: Vec<Arc<dyn IndexerClient>> = Vec::new();

    if config.indexer_manager.kind != config::IndexerManagerKind::None {
        if let (Some(url), Some(api_key)) = (&config.indexer_manager.url, &config.indexer_manager.api_key) {
            clients.push(Arc::new(AggregatorClient::new(url.clone(), api_key.clone(), config.indexer_manager.backoff_seconds)));
        } else {
            tracing::warn!("indexer manager configured but missing url/api_key — skipping aggregator");
        }
    }

    for endpoint in config.usable_newznab_endpoints() {
        clients.push(Arc::new(NewznabClient::new(endpoint.clone(), config.indexer_manager.backoff_seconds, true)));
    }

    if config.easynews.enabled {
        if let (Some(user), Some(pass)) = (&config.easynews.username, &config.easynews.password) {
            let secret = config.addon_shared_secret.clone().unwrap_or_default();
            clients.push(Arc::new(EasynewsClient::new(user.clone(), pass.clone(), secret, config.indexer_manager.backoff_seconds)));
        } else {
            tracing::warn!("easynews enabled but credentials are incomplete — skipping");
        }
    }

    tracing::info!(clients = clients.len(), "indexer manager initialized");
    IndexerManager::new_shared(clients)
}

async fn build_nntp_pool(config: &Config, registry: &NntpPoolRegistry) -> Option<Arc<services::NntpPool>> {
    if !config.triage.enabled {
        return None;
    }
    let host = config.triage.nntp_host.clone()?;

    let pool_config = NntpPoolConfig {
        host,
        port: config.triage.nntp_port,
        user: config.triage.nntp_user.clone(),
        pass: config.triage.nntp_pass.clone(),
        tls: config.triage.nntp_tls,
        capacity: config.triage.max_connections,
        keep_alive: Duration::from_millis(config.triage.nntp_keep_alive_ms),
    };

    match registry.get_or_build(pool_config).await {
        Ok(pool) => {
            tracing::info!(host = %config.triage.nntp_host.as_deref().unwrap_or(""), "nntp pool warmed");
            Some(Arc::new(pool))
        }
        Err(e) => {
            tracing::error!("failed to warm nntp pool: {e}");
            None
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    tracing::info!("Starting usenet streaming-catalog adapter v{}", env!("CARGO_PKG_VERSION"));

    let config = match Config::load() {
        Ok(cfg) => {
            tracing::info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    let config = Arc::new(config);

    let indexer_manager = build_indexer_manager(&config);

    let metadata_client = config.metadata.api_key.clone().map(|api_key| {
        let client = match &config.metadata.base_url {
            Some(base_url) => MetadataClient::new_with_base_url(api_key, base_url.clone()),
            None => MetadataClient::new(api_key),
        };
        Arc::new(client)
    });

    let easynews_client = if config.easynews.enabled {
        match (&config.easynews.username, &config.easynews.password) {
            (Some(user), Some(pass)) => {
                let secret = config.addon_shared_secret.clone().unwrap_or_default();
                Some(Arc::new(EasynewsClient::new(user.clone(), pass.clone(), secret, config.indexer_manager.backoff_seconds)))
            }
            _ => None,
        }
    } else {
        None
    };

    let nntp_pool_registry = Arc::new(NntpPoolRegistry::new());
    let nntp_pool = build_nntp_pool(&config, &nntp_pool_registry).await;

    let mount_client = config.nzbdav.url.clone().zip(config.nzbdav.webdav_url.clone()).map(|(base_url, webdav_url)| {
        Arc::new(MountClient::new(
            base_url,
            config.nzbdav.api_key.clone(),
            webdav_url,
            config.nzbdav.webdav_user.clone(),
            config.nzbdav.webdav_pass.clone(),
        ))
    });
    if mount_client.is_none() {
        tracing::warn!("NZBDAV_URL/NZBDAV_WEBDAV_URL not configured — playback proxy will serve fallbacks only");
    }

    let response_cache = Arc::new(ResponseCache::new(
        10_000,
        (config.cache.stream_cache_max_size_mb * 1024 * 1024) as usize,
        Duration::from_secs(config.cache.stream_cache_ttl_minutes * 60),
    ));
    let verified_nzb_cache = Arc::new(VerifiedNzbCache::new(
        (config.cache.verified_nzb_cache_max_size_mb * 1024 * 1024) as usize,
        Duration::from_secs(config.cache.verified_nzb_cache_ttl_minutes * 60),
    ));
    let mount_handle_cache = Arc::new(MountHandleCache::new(Duration::from_secs(config.cache.nzbdav_cache_ttl_minutes * 60)));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&config),
        Arc::clone(&indexer_manager),
        metadata_client.clone(),
        Arc::clone(&response_cache),
        Arc::clone(&verified_nzb_cache),
        Arc::clone(&mount_handle_cache),
        nntp_pool.clone(),
        mount_client.clone(),
    ));

    let http_client = reqwest::Client::builder()
        .user_agent("usenet-catalog-adapter/1.0")
        .build()
        .expect("failed to build shared HTTP client");

    let state = AppState {
        config: Arc::clone(&config),
        indexer_manager,
        metadata_client,
        easynews_client,
        response_cache,
        verified_nzb_cache,
        mount_handle_cache,
        nntp_pool_registry,
        nntp_pool,
        mount_client,
        orchestrator,
        stream_proxy: Arc::new(StreamProxy::new()),
        http_client,
        start_time: Instant::now(),
    };

    let authenticated = Router::new()
        .merge(api::routes())
        .nest("/:token", api::routes())
        .route_layer(axum_mw::from_fn_with_state(state.clone(), middleware::shared_secret_middleware));

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = config.server_addr();
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
