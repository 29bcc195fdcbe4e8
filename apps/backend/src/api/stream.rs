//! `GET /stream/:type/:id.json`: the orchestrator's main entry point.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::PlanType;
use crate::services::{StreamEntry, StreamRequest};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StreamResponse {
    pub streams: Vec<Stream>,
}

/// Stremio-shaped stream descriptor derived from an orchestrator
/// [`StreamEntry`].
#[derive(Debug, Serialize)]
pub struct Stream {
    pub name: String,
    pub title: String,
    pub url: String,
    #[serde(rename = "behaviorHints", skip_serializing_if = "Option::is_none")]
    pub behavior_hints: Option<serde_json::Value>,
}

impl From<StreamEntry> for Stream {
    fn from(entry: StreamEntry) -> Self {
        let instant_tag = if entry.instant { " ⚡" } else { "" };
        let language = entry.language_badge.as_deref().unwrap_or("");
        let title = format!(
            "{}\n{} {} {}{}",
            entry.display_title, entry.size_badge, language, entry.triage_tag, instant_tag
        );
        Stream {
            name: entry.quality_badge,
            title,
            url: entry.playback_url,
            behavior_hints: entry.instant.then(|| serde_json::json!({"bingeGroup": entry.download_url})),
        }
    }
}

/// `tt0111161` for a movie, `tt0111161:1:2` (season:episode) for a series.
fn parse_id(raw: &str) -> (String, Option<u32>, Option<u32>) {
    let trimmed = raw.strip_suffix(".json").unwrap_or(raw);
    let mut parts = trimmed.split(':');
    let base = parts.next().unwrap_or(trimmed).to_string();
    let season = parts.next().and_then(|s| s.parse().ok());
    let episode = parts.next().and_then(|s| s.parse().ok());
    (base, season, episode)
}

pub async fn get_streams(State(state): State<AppState>, Path((kind, id)): Path<(String, String)>) -> Result<Json<StreamResponse>> {
    let plan_type = match kind.as_str() {
        "movie" => PlanType::Movie,
        "series" => PlanType::Series,
        other => return Err(AppError::BadRequest(format!("unsupported stream type: {other}"))),
    };

    let (base_id, season, episode) = parse_id(&id);
    let (imdb_id, tvdb_id) = if let Some(tvdb) = base_id.strip_prefix("tvdb") {
        (None, Some(tvdb.trim_start_matches(['-', ':']).to_string()))
    } else {
        (Some(base_id), None)
    };

    let request = StreamRequest { plan_type, imdb_id, tvdb_id, season, episode };
    let entries = state.orchestrator.handle(request).await?;
    let streams = entries.into_iter().map(Stream::from).collect();
    Ok(Json(StreamResponse { streams }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_splits_season_and_episode() {
        assert_eq!(parse_id("tt0111161.json"), ("tt0111161".to_string(), None, None));
        assert_eq!(parse_id("tt0111161:1:2.json"), ("tt0111161".to_string(), Some(1), Some(2)));
    }
}
