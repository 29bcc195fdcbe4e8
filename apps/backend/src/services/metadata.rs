//! Metadata resolution client: a small TMDB-style lookup used by the
//! Search Planner to turn an IMDb/TVDB id into title candidates and a
//! year, so indexer searches aren't limited to id-only plans.
//!
//! Same HTTP-client shape as the indexer clients (timeout + JSON
//! deserialize + typed error), just against a different upstream.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";

pub struct MetadataClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedMetadata {
    pub primary_title: String,
    pub original_title: Option<String>,
    pub localized_titles: Vec<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    movie_results: Vec<FindMovieResult>,
    #[serde(default)]
    tv_results: Vec<FindTvResult>,
}

#[derive(Debug, Deserialize)]
struct FindMovieResult {
    id: i64,
    title: String,
    #[serde(default)]
    original_title: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FindTvResult {
    id: i64,
    name: String,
    #[serde(default)]
    original_name: Option<String>,
    #[serde(default)]
    first_air_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranslationsResponse {
    #[serde(default)]
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    data: TranslationData,
}

#[derive(Debug, Deserialize)]
struct TranslationData {
    #[serde(alias = "name")]
    title: Option<String>,
}

impl MetadataClient {
    pub fn new(api_key: String) -> Self {
        Self::new_with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn new_with_base_url(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build metadata HTTP client");
        Self { client, base_url, api_key }
    }

    /// `GET /3/find/:imdb_id?external_source=imdb_id`, then
    /// `GET /3/{movie|tv}/:id/translations` for localized titles.
    pub async fn resolve_by_imdb_id(&self, imdb_id: &str, is_series: bool) -> Result<ResolvedMetadata, String> {
        let find_url = format!(
            "{}/find/{}?external_source=imdb_id&api_key={}",
            self.base_url, imdb_id, self.api_key
        );
        let found: FindResponse = self
            .client
            .get(&find_url)
            .send()
            .await
            .map_err(|e| format!("metadata find request failed: {e}"))?
            .json()
            .await
            .map_err(|e| format!("malformed metadata find response: {e}"))?;

        if is_series {
            let Some(result) = found.tv_results.into_iter().next() else {
                return Err("no tv match for imdb id".to_string());
            };
            let year = result
                .first_air_date
                .as_deref()
                .and_then(|d| d.split('-').next())
                .and_then(|y| y.parse().ok());
            let localized = self.fetch_localized_titles("tv", result.id).await.unwrap_or_default();
            Ok(ResolvedMetadata {
                primary_title: result.name,
                original_title: result.original_name,
                localized_titles: localized,
                year,
            })
        } else {
            let Some(result) = found.movie_results.into_iter().next() else {
                return Err("no movie match for imdb id".to_string());
            };
            let year = result
                .release_date
                .as_deref()
                .and_then(|d| d.split('-').next())
                .and_then(|y| y.parse().ok());
            let localized = self.fetch_localized_titles("movie", result.id).await.unwrap_or_default();
            Ok(ResolvedMetadata {
                primary_title: result.title,
                original_title: result.original_title,
                localized_titles: localized,
                year,
            })
        }
    }

    async fn fetch_localized_titles(&self, kind: &str, id: i64) -> Result<Vec<String>, String> {
        let url = format!("{}/{}/{}/translations?api_key={}", self.base_url, kind, id, self.api_key);
        let resp: TranslationsResponse = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("translations request failed: {e}"))?
            .json()
            .await
            .map_err(|e| format!("malformed translations response: {e}"))?;

        Ok(resp
            .translations
            .into_iter()
            .filter_map(|t| t.data.title)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_construction_does_not_panic() {
        let _client = MetadataClient::new("test-key".to_string());
    }
}
