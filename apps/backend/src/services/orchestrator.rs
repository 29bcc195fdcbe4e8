//! Orchestrator: the single request handler that composes metadata
//! resolution, search planning, ranking, triage, and response-cache
//! writeback into one stream listing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{PlanType, Release, SearchPlan, TriageDecision, TriageStatus};
use crate::services::cache::{CachedResponse, MountHandleCache, ResponseCache, VerifiedNzbCache, CACHED_RESPONSE_VERSION};
use crate::services::indexer::IndexerManager;
use crate::services::metadata::MetadataClient;
use crate::services::mount_client::MountClient;
use crate::services::nntp::NntpPool;
use crate::services::planner::{self, PlanRequest};
use crate::services::ranker;
use crate::services::triage::{TriageConfig, TriageRunner};

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub plan_type: PlanType,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl StreamRequest {
    /// Canonical cache key: stable regardless of field declaration order.
    pub fn cache_key(&self) -> String {
        format!(
            "{:?}|imdb={}|tvdb={}|s={}|e={}",
            self.plan_type,
            self.imdb_id.as_deref().unwrap_or(""),
            self.tvdb_id.as_deref().unwrap_or(""),
            self.season.map(|s| s.to_string()).unwrap_or_default(),
            self.episode.map(|e| e.to_string()).unwrap_or_default(),
        )
    }

    fn plan_request(&self) -> PlanRequest {
        PlanRequest {
            plan_type: self.plan_type,
            imdb_id: self.imdb_id.clone(),
            tvdb_id: self.tvdb_id.clone(),
            season: self.season,
            episode: self.episode,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamEntry {
    pub display_title: String,
    pub download_url: String,
    pub quality_badge: String,
    pub size_badge: String,
    pub language_badge: Option<String>,
    pub triage_tag: &'static str,
    pub instant: bool,
    pub playback_url: String,
}

pub struct Orchestrator {
    config: Arc<Config>,
    indexer_manager: Arc<IndexerManager>,
    metadata_client: Option<Arc<MetadataClient>>,
    response_cache: Arc<ResponseCache>,
    verified_nzb_cache: Arc<VerifiedNzbCache>,
    mount_handle_cache: Arc<MountHandleCache>,
    nntp_pool: Option<Arc<NntpPool>>,
    mount_client: Option<Arc<MountClient>>,
    http_client: reqwest::Client,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        indexer_manager: Arc<IndexerManager>,
        metadata_client: Option<Arc<MetadataClient>>,
        response_cache: Arc<ResponseCache>,
        verified_nzb_cache: Arc<VerifiedNzbCache>,
        mount_handle_cache: Arc<MountHandleCache>,
        nntp_pool: Option<Arc<NntpPool>>,
        mount_client: Option<Arc<MountClient>>,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent("usenet-catalog-adapter/1.0")
            .build()
            .expect("failed to build orchestrator HTTP client");
        Self {
            config,
            indexer_manager,
            metadata_client,
            response_cache,
            verified_nzb_cache,
            mount_handle_cache,
            nntp_pool,
            mount_client,
            http_client,
        }
    }

    pub async fn handle(&self, request: StreamRequest) -> Result<Vec<StreamEntry>, AppError> {
        let cache_key = request.cache_key();

        // Step 2: response-cache hit handling. A complete hit returns the
        // cached payload outright; a partial hit already paid for plan
        // dispatch, metadata resolution and ranking, so resume from triage
        // instead of redoing all of that from scratch.
        if let Some(cached) = self.response_cache.get(&cache_key).await {
            if cached.triage_complete {
                return Ok(deserialize_entries(&cached.payload));
            }
            return self
                .continue_with_ranked(&request, cache_key, cached.ranked_releases, cached.triage_decisions)
                .await;
        }

        // Step 3: concurrently kick off metadata resolution and id-based plans.
        let plan_request = request.plan_request();
        let id_plans = planner::id_based_plans(&plan_request);

        let metadata_future = async {
            match (&self.metadata_client, &request.imdb_id) {
                (Some(client), Some(imdb_id)) => {
                    client.resolve_by_imdb_id(imdb_id, request.plan_type == PlanType::Series).await.ok()
                }
                _ => None,
            }
        };

        let (metadata, id_results) = tokio::join!(metadata_future, self.dispatch_plans(&id_plans));
        let (mut releases, mut errors) = id_results;

        // Step 4: augment with text plans once metadata resolves.
        if let Some(ref metadata) = metadata {
            let text_plans = planner::text_plans(&plan_request, metadata);
            let (mut text_releases, mut text_errors) = self.dispatch_plans(&text_plans).await;
            releases.append(&mut text_releases);
            errors.append(&mut text_errors);

            if releases.is_empty() {
                if let Some(fallback) = planner::fallback_plan(&plan_request, metadata) {
                    let (mut fb_releases, mut fb_errors) = self.dispatch_plans(&[fallback]).await;
                    releases.append(&mut fb_releases);
                    errors.append(&mut fb_errors);
                }
            }
        }

        // Step 5: rank.
        let paid_ids = self.indexer_manager.paid_client_ids();
        let ranked = ranker::rank(releases, &self.config.ranker, &paid_ids);

        self.continue_with_ranked(&request, cache_key, ranked, HashMap::new()).await
    }

    /// Steps 6-9: triage whatever candidates don't already have a terminal
    /// decision, assemble the entry list, and write the result back to the
    /// response cache. Shared by a fresh dispatch (`decisions` empty) and a
    /// partial-cache-hit resume (`decisions` seeded from the prior attempt).
    async fn continue_with_ranked(
        &self,
        request: &StreamRequest,
        cache_key: String,
        ranked: Vec<Release>,
        mut decisions: HashMap<String, TriageDecision>,
    ) -> Result<Vec<StreamEntry>, AppError> {
        let paid_ids = self.indexer_manager.paid_client_ids();
        let is_triage_eligible = |r: &Release| paid_ids.contains(&r.indexer_id) || r.indexer_id == "easynews";

        let mut triage_complete = true;
        let mut pending_download_urls: Vec<String> = Vec::new();

        let has_identifiers = request.imdb_id.is_some() || request.tvdb_id.is_some();
        if self.config.triage.enabled && has_identifiers {
            if let Some(pool) = &self.nntp_pool {
                let outstanding: Vec<Release> = ranked
                    .iter()
                    .filter(|r| is_triage_eligible(r))
                    .filter(|r| !matches!(decisions.get(&r.download_url), Some(d) if d.status != TriageStatus::Pending))
                    .cloned()
                    .collect();

                if !outstanding.is_empty() {
                    let runner = TriageRunner::new(self.http_client.clone(), Arc::clone(pool));
                    let triage_config = TriageConfig {
                        time_budget: Duration::from_millis(self.config.triage.time_budget_ms),
                        max_candidates: self.config.triage.max_candidates,
                        download_concurrency: self.config.triage.download_concurrency,
                        stat_sample_count: self.config.triage.stat_sample_count,
                        serialized_indexer_ids: self.config.triage.serialized_indexers.iter().cloned().collect(),
                    };

                    let report = runner.run(outstanding, triage_config).await;

                    // Step 7: seed the Verified-NZB cache from bodies triage
                    // already downloaded, and best-effort pre-warm a mount for
                    // the first verified candidate.
                    for (download_url, body) in &report.verified_bodies {
                        self.verified_nzb_cache.insert(download_url.clone(), body.as_bytes().to_vec()).await;
                    }
                    if self.config.triage.prefetch_first_verified {
                        if let Some((url, body)) = report.verified_bodies.iter().next() {
                            self.prewarm_mount(url.clone(), Arc::clone(body));
                        }
                    }

                    decisions.extend(report.decisions);
                }

                pending_download_urls = ranked
                    .iter()
                    .filter(|r| is_triage_eligible(r))
                    .filter(|r| !matches!(decisions.get(&r.download_url), Some(d) if d.status != TriageStatus::Pending))
                    .map(|r| r.download_url.clone())
                    .collect();
                triage_complete = pending_download_urls.is_empty();
            } else {
                triage_complete = false;
                pending_download_urls =
                    ranked.iter().filter(|r| is_triage_eligible(r)).map(|r| r.download_url.clone()).collect();
            }
        }

        // Step 8: assemble.
        let category = match request.plan_type {
            PlanType::Series => self.config.nzbdav.category_series.clone(),
            _ => self.config.nzbdav.category_movies.clone(),
        };
        let mut entries = Vec::with_capacity(ranked.len());
        for release in &ranked {
            let decision = decisions.get(&release.download_url);
            let triage_tag = triage_tag_for(decision);
            let mount_key = MountHandleCache::key(&release.download_url, &category, None);
            let instant = self.mount_handle_cache.has_ready(&mount_key).await;
            entries.push(StreamEntry {
                display_title: release.raw_title.clone(),
                download_url: release.download_url.clone(),
                quality_badge: release.resolution.clone(),
                size_badge: format_size(release.size_bytes),
                language_badge: release.languages.first().cloned(),
                triage_tag,
                instant,
                playback_url: sign_playback_url(&self.config, release),
            });
        }

        entries.sort_by_key(|e| !e.instant);

        // Step 9: write back to the response cache, carrying enough state
        // to resume from triage alone on the next partial hit.
        let payload = serde_json::to_value(&entries).map_err(|e| AppError::internal(e.to_string()))?;
        self.response_cache
            .insert(
                cache_key,
                CachedResponse {
                    version: CACHED_RESPONSE_VERSION,
                    stored_at_ms: Utc::now().timestamp_millis(),
                    payload,
                    triage_complete,
                    ranked_releases: ranked,
                    triage_decisions: decisions,
                    pending_download_urls,
                },
            )
            .await;

        Ok(entries)
    }

    /// Best-effort, background: never blocks the response on a mount
    /// finishing, and any failure is silently absorbed.
    fn prewarm_mount(&self, download_url: String, body: Arc<String>) {
        let Some(mount_client) = self.mount_client.clone() else { return };
        let mount_handle_cache = Arc::clone(&self.mount_handle_cache);
        let category = self.config.nzbdav.category_movies.clone();

        tokio::spawn(async move {
            let key = MountHandleCache::key(&download_url, &category, None);
            let _ = mount_handle_cache
                .get_or_build(
                    &key,
                    || async move {
                        let job_id = mount_client
                            .submit(&download_url, Some(body.as_bytes()), &category)
                            .await
                            .map_err(|e| e.to_string())?;
                        let mount_path = mount_client.await_completion(&job_id).await.map_err(|e| e.to_string())?;
                        let target = mount_client
                            .find_playback_target(&mount_path, None)
                            .await
                            .map_err(|e| e.to_string())?;
                        Ok(crate::models::MountHandle {
                            status: crate::models::MountStatus::Ready,
                            mount_path: Some(target.webdav_path),
                            filename: Some(target.filename),
                            file_size: Some(target.size_bytes),
                            error: None,
                        })
                    },
                    |err| err.contains("no playable video") || err.contains("mount job failed"),
                )
                .await;
        });
    }

    async fn dispatch_plans(&self, plans: &[SearchPlan]) -> (Vec<Release>, Vec<String>) {
        let mut releases = Vec::new();
        let mut errors = Vec::new();
        for plan in plans {
            let (mut r, mut e) = self.indexer_manager.search_all(plan).await;
            releases.append(&mut r);
            errors.append(&mut e);
        }
        (releases, errors)
    }
}

fn triage_tag_for(decision: Option<&TriageDecision>) -> &'static str {
    match decision.map(|d| d.status) {
        Some(TriageStatus::Verified) => "✅",
        Some(TriageStatus::Unverified) | Some(TriageStatus::Unverified7z) => "⚠️",
        Some(TriageStatus::Blocked) => "🚫",
        Some(TriageStatus::Pending) | Some(TriageStatus::Skipped) => "⏱️",
        Some(TriageStatus::FetchError) | Some(TriageStatus::Error) => "⚠️",
        None => "⏱️",
    }
}

fn format_size(bytes: u64) -> String {
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    format!("{:.2} GB", bytes as f64 / GB)
}

/// A minimal signed URL: the playback path plus an expiry and an HMAC
/// digest over `(download_url, expiry, shared_secret)`, matching the
/// addon's existing shared-secret auth model instead of introducing a
/// second secret.
fn sign_playback_url(config: &Config, release: &Release) -> String {
    use sha2::{Digest, Sha256};

    let secret = config.addon_shared_secret.as_deref().unwrap_or("");
    let expiry = (Utc::now().timestamp() + 6 * 3600).to_string();
    let mut hasher = Sha256::new();
    hasher.update(release.download_url.as_bytes());
    hasher.update(expiry.as_bytes());
    hasher.update(secret.as_bytes());
    let signature = hex::encode(hasher.finalize());

    let type_param = match release.source_type {
        crate::models::SourceType::Aggregator => "aggregator",
        crate::models::SourceType::Direct => "direct",
        crate::models::SourceType::Easynews => "easynews",
    };

    let easynews_param = release
        .payload_token
        .as_deref()
        .map(|t| format!("&easynewsPayload={}", urlencoding::encode(t)))
        .unwrap_or_default();

    format!(
        "{}/nzb/stream?downloadUrl={}&type={}&title={}&size={}&exp={}&sig={}{}",
        config.addon_base_url.trim_end_matches('/'),
        urlencoding::encode(&release.download_url),
        type_param,
        urlencoding::encode(&release.raw_title),
        release.size_bytes,
        expiry,
        signature,
        easynews_param,
    )
}

/// Recomputes [`sign_playback_url`]'s digest and compares; also rejects an
/// already-expired `exp`.
pub fn verify_playback_signature(config: &Config, download_url: &str, expiry: &str, signature: &str) -> bool {
    use sha2::{Digest, Sha256};

    let Ok(expiry_ts) = expiry.parse::<i64>() else { return false };
    if expiry_ts < Utc::now().timestamp() {
        return false;
    }

    let secret = config.addon_shared_secret.as_deref().unwrap_or("");
    let mut hasher = Sha256::new();
    hasher.update(download_url.as_bytes());
    hasher.update(expiry.as_bytes());
    hasher.update(secret.as_bytes());
    let expected = hex::encode(hasher.finalize());
    expected == signature
}

fn deserialize_entries(value: &serde_json::Value) -> Vec<StreamEntry> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_for_identical_fields() {
        let a = StreamRequest { plan_type: PlanType::Movie, imdb_id: Some("tt1".into()), tvdb_id: None, season: None, episode: None };
        let b = StreamRequest { plan_type: PlanType::Movie, imdb_id: Some("tt1".into()), tvdb_id: None, season: None, episode: None };
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn triage_tag_maps_statuses_to_badges() {
        let verified = TriageDecision {
            download_url: "u".into(),
            status: TriageStatus::Verified,
            blockers: vec![],
            warnings: vec![],
            archive_findings: vec![],
            file_count: 1,
            source_title: "t".into(),
            normalized_title: "t".into(),
            indexer_id: "i".into(),
            indexer_name: "i".into(),
            publish_instant_ms: 0,
            age_days: 0.0,
        };
        assert_eq!(triage_tag_for(Some(&verified)), "✅");
        assert_eq!(triage_tag_for(None), "⏱️");
    }

    #[test]
    fn format_size_renders_gb() {
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00 GB");
    }
}
