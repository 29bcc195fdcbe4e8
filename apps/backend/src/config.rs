//! Configuration module for the streaming-catalog adapter.
//!
//! Loads configuration from `config.json` with environment variable
//! overrides, matching the flat key surface the adapter has always
//! exposed to operators.

use config::{Config as ConfigLoader, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub addon_base_url: String,
    pub addon_shared_secret: Option<String>,
    #[serde(default = "default_addon_name")]
    pub addon_name: String,

    #[serde(default)]
    pub indexer_manager: IndexerManagerConfig,

    #[serde(default)]
    pub newznab_endpoints: Vec<NewznabEndpointConfig>,

    #[serde(default)]
    pub ranker: RankerConfig,

    #[serde(default)]
    pub triage: TriageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub nzbdav: NzbDavConfig,

    #[serde(default)]
    pub easynews: EasynewsConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl std::fmt::Debug for EasynewsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EasynewsConfig")
            .field("enabled", &self.enabled)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn default_port() -> u16 {
    8080
}

fn default_addon_name() -> String {
    "Usenet Catalog".to_string()
}

/// Which aggregator dialect, if any, fronts the direct Newznab endpoints.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexerManagerKind {
    #[default]
    None,
    Prowlarr,
    Nzbhydra,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct IndexerManagerConfig {
    #[serde(default)]
    pub kind: IndexerManagerKind,
    pub url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: u64,
}

fn default_backoff_seconds() -> u64 {
    120
}

/// One of the 20 ordinal `NEWZNAB_ENDPOINT_{ii}` slots.
#[derive(Debug, Clone, Deserialize)]
pub struct NewznabEndpointConfig {
    pub slot: u8,
    pub endpoint: String,
    pub api_key: String,
    #[serde(default = "default_api_path")]
    pub api_path: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub paid: bool,
}

fn default_api_path() -> String {
    "/api".to_string()
}

fn default_enabled() -> bool {
    true
}

impl NewznabEndpointConfig {
    /// Usable iff enabled and carries an API key — spec §3 "Indexer Config".
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.api_key.is_empty()
    }

    /// Stable dedupe key derived from the ordinal slot and display name.
    pub fn dedupe_key(&self) -> String {
        format!("{}-{}", self.slot, slugify(&self.name))
    }
}

fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    QualityThenSize,
    LanguageQualitySize,
}

impl Default for SortMode {
    fn default() -> Self {
        Self::QualityThenSize
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankerConfig {
    #[serde(default)]
    pub sort_mode: SortMode,
    #[serde(default)]
    pub preferred_language: Vec<String>,
    #[serde(default = "default_max_result_size_gb")]
    pub max_result_size_gb: f64,
    #[serde(default)]
    pub allowed_resolutions: Vec<String>,
    pub resolution_limit_per_quality: Option<u32>,
    #[serde(default = "default_true")]
    pub dedup_enabled: bool,
    #[serde(default)]
    pub hide_blocked_results: bool,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            sort_mode: SortMode::default(),
            preferred_language: Vec::new(),
            max_result_size_gb: default_max_result_size_gb(),
            allowed_resolutions: Vec::new(),
            resolution_limit_per_quality: None,
            dedup_enabled: true,
            hide_blocked_results: false,
        }
    }
}

fn default_max_result_size_gb() -> f64 {
    60.0
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Deserialize)]
pub struct TriageConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_time_budget_ms")]
    pub time_budget_ms: u64,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_stat_sample_count")]
    pub stat_sample_count: usize,
    #[serde(default = "default_archive_sample_count")]
    pub archive_sample_count: usize,
    pub nntp_host: Option<String>,
    #[serde(default = "default_nntp_port")]
    pub nntp_port: u16,
    #[serde(default)]
    pub nntp_tls: bool,
    pub nntp_user: Option<String>,
    pub nntp_pass: Option<String>,
    #[serde(default = "default_keep_alive_ms")]
    pub nntp_keep_alive_ms: u64,
    #[serde(default = "default_true")]
    pub reuse_pool: bool,
    #[serde(default)]
    pub prefetch_first_verified: bool,
    #[serde(default)]
    pub priority_indexers: Vec<String>,
    #[serde(default)]
    pub serialized_indexers: Vec<String>,
}

impl std::fmt::Debug for TriageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriageConfig")
            .field("enabled", &self.enabled)
            .field("time_budget_ms", &self.time_budget_ms)
            .field("max_candidates", &self.max_candidates)
            .field("download_concurrency", &self.download_concurrency)
            .field("max_connections", &self.max_connections)
            .field("stat_sample_count", &self.stat_sample_count)
            .field("archive_sample_count", &self.archive_sample_count)
            .field("nntp_host", &self.nntp_host)
            .field("nntp_port", &self.nntp_port)
            .field("nntp_tls", &self.nntp_tls)
            .field("nntp_user", &self.nntp_user)
            .field("nntp_pass", &self.nntp_pass.as_ref().map(|_| "[REDACTED]"))
            .field("nntp_keep_alive_ms", &self.nntp_keep_alive_ms)
            .field("reuse_pool", &self.reuse_pool)
            .field("prefetch_first_verified", &self.prefetch_first_verified)
            .field("priority_indexers", &self.priority_indexers)
            .field("serialized_indexers", &self.serialized_indexers)
            .finish()
    }
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            time_budget_ms: default_time_budget_ms(),
            max_candidates: default_max_candidates(),
            download_concurrency: default_download_concurrency(),
            max_connections: default_max_connections(),
            stat_sample_count: default_stat_sample_count(),
            archive_sample_count: default_archive_sample_count(),
            nntp_host: None,
            nntp_port: default_nntp_port(),
            nntp_tls: false,
            nntp_user: None,
            nntp_pass: None,
            nntp_keep_alive_ms: default_keep_alive_ms(),
            reuse_pool: true,
            prefetch_first_verified: false,
            priority_indexers: Vec::new(),
            serialized_indexers: Vec::new(),
        }
    }
}

fn default_time_budget_ms() -> u64 {
    20_000
}
fn default_max_candidates() -> usize {
    25
}
fn default_download_concurrency() -> usize {
    8
}
fn default_max_connections() -> usize {
    4
}
fn default_stat_sample_count() -> usize {
    3
}
fn default_archive_sample_count() -> usize {
    2
}
fn default_nntp_port() -> u16 {
    119
}
fn default_keep_alive_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_stream_cache_ttl_minutes")]
    pub stream_cache_ttl_minutes: u64,
    #[serde(default = "default_stream_cache_max_size_mb")]
    pub stream_cache_max_size_mb: u64,
    #[serde(default = "default_verified_nzb_cache_ttl_minutes")]
    pub verified_nzb_cache_ttl_minutes: u64,
    #[serde(default = "default_verified_nzb_cache_max_size_mb")]
    pub verified_nzb_cache_max_size_mb: u64,
    #[serde(default = "default_nzbdav_cache_ttl_minutes")]
    pub nzbdav_cache_ttl_minutes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stream_cache_ttl_minutes: default_stream_cache_ttl_minutes(),
            stream_cache_max_size_mb: default_stream_cache_max_size_mb(),
            verified_nzb_cache_ttl_minutes: default_verified_nzb_cache_ttl_minutes(),
            verified_nzb_cache_max_size_mb: default_verified_nzb_cache_max_size_mb(),
            nzbdav_cache_ttl_minutes: default_nzbdav_cache_ttl_minutes(),
        }
    }
}

fn default_stream_cache_ttl_minutes() -> u64 {
    24 * 60
}
fn default_stream_cache_max_size_mb() -> u64 {
    200
}
fn default_verified_nzb_cache_ttl_minutes() -> u64 {
    24 * 60
}
fn default_verified_nzb_cache_max_size_mb() -> u64 {
    300
}
fn default_nzbdav_cache_ttl_minutes() -> u64 {
    10
}

#[derive(Clone, Deserialize, Default)]
pub struct NzbDavConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub webdav_url: Option<String>,
    pub webdav_user: Option<String>,
    pub webdav_pass: Option<String>,
    #[serde(default = "default_category_movies")]
    pub category_movies: String,
    #[serde(default = "default_category_series")]
    pub category_series: String,
}

impl std::fmt::Debug for NzbDavConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NzbDavConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("webdav_url", &self.webdav_url)
            .field("webdav_user", &self.webdav_user)
            .field("webdav_pass", &self.webdav_pass.as_ref().map(|_| "[REDACTED]"))
            .field("category_movies", &self.category_movies)
            .field("category_series", &self.category_series)
            .finish()
    }
}

fn default_category_movies() -> String {
    "movies".to_string()
}
fn default_category_series() -> String {
    "tv".to_string()
}

#[derive(Clone, Deserialize, Default)]
pub struct EasynewsConfig {
    #[serde(default)]
    pub enabled: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// TMDB-style lookup used to augment id-only search plans with titles —
/// spec's metadata provider collaborator.
#[derive(Clone, Deserialize, Default)]
pub struct MetadataConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl std::fmt::Debug for MetadataConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Config {
    /// Load configuration from `config.json` in the current directory plus
    /// `NZBCAT_`-prefixed environment overrides.
    ///
    /// `NZBCAT_TRIAGE__TIME_BUDGET_MS=15000` sets `triage.time_budget_ms`.
    pub fn load() -> Result<Self, AppError> {
        Self::load_from("config.json")
    }

    pub fn load_from(config_path: &str) -> Result<Self, AppError> {
        let config = ConfigLoader::builder()
            .set_default("port", 8080)?
            .set_default("addon_name", "Usenet Catalog")?
            .set_default("indexer_manager.kind", "none")?
            .set_default("indexer_manager.backoff_seconds", 120)?
            .set_default("ranker.sort_mode", "quality_then_size")?
            .set_default("ranker.max_result_size_gb", 60.0)?
            .set_default("ranker.dedup_enabled", true)?
            .set_default("triage.enabled", false)?
            .set_default("triage.time_budget_ms", 20_000)?
            .set_default("triage.max_candidates", 25)?
            .set_default("triage.download_concurrency", 8)?
            .set_default("triage.max_connections", 4)?
            .set_default("triage.stat_sample_count", 3)?
            .set_default("triage.archive_sample_count", 2)?
            .set_default("triage.nntp_port", 119)?
            .set_default("triage.nntp_keep_alive_ms", 60_000)?
            .set_default("triage.reuse_pool", true)?
            .set_default("cache.stream_cache_ttl_minutes", 24 * 60)?
            .set_default("cache.stream_cache_max_size_mb", 200)?
            .set_default("cache.verified_nzb_cache_ttl_minutes", 24 * 60)?
            .set_default("cache.verified_nzb_cache_max_size_mb", 300)?
            .set_default("cache.nzbdav_cache_ttl_minutes", 10)?
            .set_default("nzbdav.category_movies", "movies")?
            .set_default("nzbdav.category_series", "tv")?
            .add_source(File::new(config_path, FileFormat::Json).required(false))
            .add_source(
                Environment::with_prefix("NZBCAT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate();
        Ok(config)
    }

    /// Non-fatal: missing secrets are logged but don't prevent startup so
    /// `/health` keeps responding while an operator finishes setup.
    fn validate(&self) {
        if self.addon_shared_secret.is_none() {
            tracing::warn!("ADDON_SHARED_SECRET not configured — all routes are unauthenticated");
        }
        if self.triage.enabled && self.triage.nntp_host.is_none() {
            tracing::warn!("triage enabled but NNTP_HOST not configured — triage will no-op");
        }
        if self.easynews.enabled && (self.easynews.username.is_none() || self.easynews.password.is_none()) {
            tracing::warn!("Easynews enabled but credentials are incomplete");
        }
    }

    pub fn server_addr(&self) -> std::net::SocketAddr {
        use std::net::{IpAddr, SocketAddr};
        let ip: IpAddr = "0.0.0.0".parse().unwrap();
        SocketAddr::new(ip, self.port)
    }

    /// Indexer slots that are enabled, keyed, and eligible for fan-out.
    pub fn usable_newznab_endpoints(&self) -> Vec<&NewznabEndpointConfig> {
        self.newznab_endpoints.iter().filter(|e| e.is_usable()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::load_from("nonexistent.json").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.addon_name, "Usenet Catalog");
        assert_eq!(config.ranker.sort_mode, SortMode::QualityThenSize);
    }

    #[test]
    fn test_server_addr() {
        let config = Config::load_from("nonexistent.json").unwrap();
        assert_eq!(config.server_addr().port(), 8080);
    }

    #[test]
    fn test_triage_defaults() {
        let config = Config::load_from("nonexistent.json").unwrap();
        assert!(!config.triage.enabled);
        assert_eq!(config.triage.max_candidates, 25);
        assert_eq!(config.triage.download_concurrency, 8);
    }

    #[test]
    fn test_newznab_usable_filters_disabled_and_unkeyed() {
        let mut config = Config::load_from("nonexistent.json").unwrap();
        config.newznab_endpoints = vec![
            NewznabEndpointConfig {
                slot: 1,
                endpoint: "https://a.example".into(),
                api_key: "key".into(),
                api_path: "/api".into(),
                name: "A".into(),
                enabled: true,
                paid: false,
            },
            NewznabEndpointConfig {
                slot: 2,
                endpoint: "https://b.example".into(),
                api_key: String::new(),
                api_path: "/api".into(),
                name: "B".into(),
                enabled: true,
                paid: false,
            },
        ];
        assert_eq!(config.usable_newznab_endpoints().len(), 1);
    }
}
