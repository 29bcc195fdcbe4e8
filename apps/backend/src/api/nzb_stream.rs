//! `GET,HEAD /nzb/stream`: the playback proxy. Resolves a download URL (or
//! an Easynews payload token) to a mount handle, via the single-flight
//! Mount Handle Cache, then proxies the ranged request through to the
//! mount service's WebDAV file.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{MountHandle, MountStatus};
use crate::services::{verify_playback_signature, FallbackKind, MountHandleCache};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NzbStreamQuery {
    #[serde(rename = "downloadUrl")]
    pub download_url: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub id: Option<String>,
    pub title: Option<String>,
    pub size: Option<u64>,
    #[serde(rename = "historyNzoId")]
    pub history_nzo_id: Option<String>,
    #[serde(rename = "historyJobName")]
    pub history_job_name: Option<String>,
    #[serde(rename = "historyCategory")]
    pub history_category: Option<String>,
    #[serde(rename = "easynewsPayload")]
    pub easynews_payload: Option<String>,
    pub exp: String,
    pub sig: String,
}

pub async fn proxy_stream(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<NzbStreamQuery>,
) -> Response {
    if !verify_playback_signature(&state.config, &query.download_url, &query.exp, &query.sig) {
        return state.stream_proxy.fallback_response(&method, FallbackKind::NzbFailure, "invalid or expired playback signature");
    }

    let Some(mount_client) = state.mount_client.as_ref() else {
        return state.stream_proxy.fallback_response(&method, FallbackKind::NzbFailure, "mount service not configured");
    };

    let category = query.history_category.clone().unwrap_or_else(|| match query.kind.as_deref() {
        Some("series") => state.config.nzbdav.category_series.clone(),
        _ => state.config.nzbdav.category_movies.clone(),
    });

    let nzb_body = if let Some(payload) = &query.easynews_payload {
        match resolve_easynews_body(&state, payload).await {
            Ok(body) => Some(body),
            Err(reason) => return state.stream_proxy.fallback_response(&method, FallbackKind::NzbFailure, &reason),
        }
    } else {
        state.verified_nzb_cache.get(&query.download_url).await.map(|arc| arc.as_ref().clone())
    };

    let key = MountHandleCache::key(&query.download_url, &category, None);
    let mount_client = Arc::clone(mount_client);
    let download_url = query.download_url.clone();
    let result = state
        .mount_handle_cache
        .get_or_build(
            &key,
            || async move {
                let job_id = mount_client
                    .submit(&download_url, nzb_body.as_deref(), &category)
                    .await
                    .map_err(|e| e.to_string())?;
                let mount_path = mount_client.await_completion(&job_id).await.map_err(|e| e.to_string())?;
                let target = mount_client.find_playback_target(&mount_path, None).await.map_err(|e| e.to_string())?;
                Ok(MountHandle {
                    status: MountStatus::Ready,
                    mount_path: Some(target.webdav_path),
                    filename: Some(target.filename),
                    file_size: Some(target.size_bytes),
                    error: None,
                })
            },
            |err| err.contains("no playable video") || err.contains("mount job failed"),
        )
        .await;

    let handle = match result {
        Ok(handle) => handle,
        Err(reason) => return state.stream_proxy.fallback_response(&method, FallbackKind::NzbFailure, &reason),
    };

    let Some(mount_path) = handle.mount_path else {
        return state.stream_proxy.fallback_response(&method, FallbackKind::NoVideoFound, "mount handle has no path");
    };
    let target = crate::services::PlaybackTarget {
        webdav_path: mount_path,
        filename: handle.filename.unwrap_or_else(|| query.title.clone().unwrap_or_else(|| "stream".to_string())),
        size_bytes: handle.file_size.unwrap_or(0),
    };
    let upstream_url = state.mount_client.as_ref().unwrap().webdav_file_url(&target);

    state.stream_proxy.proxy(&method, &upstream_url, &headers, &target.filename).await
}

async fn resolve_easynews_body(state: &AppState, payload: &str) -> Result<Vec<u8>, String> {
    let secret = state.config.addon_shared_secret.as_deref().unwrap_or("");
    let (hash, filename) = crate::services::indexer::easynews::decode_payload_token(payload, secret)?;
    let client = state.easynews_client().ok_or_else(|| "easynews not configured".to_string())?;
    client.fetch_nzb(&hash, &filename).await
}
