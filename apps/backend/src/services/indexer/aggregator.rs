//! Aggregator client: a single Prowlarr/NZBHydra-style endpoint that
//! federates many indexers behind one JSON search API.

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::{now_ms, CircuitBreaker, IndexerClient};
use crate::models::{PlanType, Release, SearchPlan, SourceType};
use crate::services::release_parser::parse_title;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: u32 = 2;

pub struct AggregatorClient {
    client: Client,
    base_url: String,
    api_key: String,
    breaker: CircuitBreaker,
}

impl AggregatorClient {
    pub fn new(base_url: String, api_key: String, backoff_seconds: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent("usenet-catalog-adapter/1.0")
            .build()
            .expect("failed to build aggregator HTTP client");
        Self {
            client,
            base_url,
            api_key,
            breaker: CircuitBreaker::new(backoff_seconds),
        }
    }

    fn build_url(&self, plan: &SearchPlan) -> String {
        let mut url = format!("{}/api/v1/search?query={}", self.base_url, urlencoding::encode(&plan.query));
        if let Some(ref imdb) = plan.tokens.imdb_id {
            url.push_str(&format!("&imdbId={}", urlencoding::encode(imdb)));
        }
        if let Some(ref tvdb) = plan.tokens.tvdb_id {
            url.push_str(&format!("&tvdbId={}", urlencoding::encode(tvdb)));
        }
        if let Some(season) = plan.tokens.season {
            url.push_str(&format!("&season={}", season));
        }
        if let Some(episode) = plan.tokens.episode {
            url.push_str(&format!("&episode={}", episode));
        }
        let category = match plan.plan_type {
            PlanType::Movie => "2000",
            PlanType::Series => "5000",
            PlanType::Search => "",
        };
        if !category.is_empty() {
            url.push_str(&format!("&categories={}", category));
        }
        url
    }

    async fn execute_with_retry(&self, url: &str) -> Result<Vec<AggregatorItem>, String> {
        let mut attempt = 0;
        loop {
            let resp = self
                .client
                .get(url)
                .header("X-Api-Key", &self.api_key)
                .send()
                .await;

            match resp {
                Ok(r) if r.status().is_success() => {
                    return r
                        .json::<Vec<AggregatorItem>>()
                        .await
                        .map_err(|e| format!("malformed aggregator payload: {e}"));
                }
                Ok(r) if r.status() == StatusCode::UNAUTHORIZED || r.status() == StatusCode::FORBIDDEN => {
                    return Err(format!("aggregator auth failure: {}", r.status()));
                }
                Ok(r) if is_transient_status(r.status()) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    sleep_backoff(attempt).await;
                    continue;
                }
                Ok(r) => return Err(format!("aggregator returned {}", r.status())),
                Err(e) if is_transient_reqwest_error(&e) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    sleep_backoff(attempt).await;
                    continue;
                }
                Err(e) => return Err(format!("aggregator request failed: {e}")),
            }
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_transient_reqwest_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

async fn sleep_backoff(attempt: u32) {
    let base_ms = 200u64 * 2u64.pow(attempt);
    let jitter_pct = rand::thread_rng().gen_range(-30..=30);
    let jittered = (base_ms as i64 + base_ms as i64 * jitter_pct / 100).max(0) as u64;
    tokio::time::sleep(Duration::from_millis(jittered)).await;
}

#[async_trait]
impl IndexerClient for AggregatorClient {
    fn id(&self) -> &str {
        "aggregator"
    }

    fn display_name(&self) -> &str {
        "Indexer Manager"
    }

    async fn search(&self, plan: &SearchPlan) -> (Vec<Release>, Vec<String>) {
        if self.breaker.is_open() {
            return (Vec::new(), vec!["aggregator circuit open, skipping".to_string()]);
        }

        let url = self.build_url(plan);
        match self.execute_with_retry(&url).await {
            Ok(items) => {
                let releases = items.into_iter().filter_map(|item| item.into_release()).collect();
                (releases, Vec::new())
            }
            Err(e) => {
                self.breaker.trip();
                (Vec::new(), vec![e])
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct AggregatorItem {
    title: String,
    #[serde(alias = "downloadUrl", alias = "link")]
    download_url: String,
    #[serde(default)]
    indexer: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default, alias = "publishDate")]
    publish_date: Option<String>,
}

impl AggregatorItem {
    fn into_release(self) -> Option<Release> {
        if self.download_url.is_empty() {
            return None;
        }
        let parsed = parse_title(&self.title);
        let publish_instant_ms = self
            .publish_date
            .as_deref()
            .and_then(parse_rfc822_or_rfc3339)
            .unwrap_or_else(now_ms);
        let age_days = (now_ms() - publish_instant_ms) as f64 / 86_400_000.0;
        Some(Release {
            raw_title: self.title,
            download_url: self.download_url,
            indexer_name: self.indexer.clone().unwrap_or_else(|| "aggregator".to_string()),
            indexer_id: "aggregator".to_string(),
            size_bytes: self.size.unwrap_or(0),
            publish_instant_ms,
            age_days,
            resolution: parsed.resolution,
            languages: parsed.languages,
            quality_score: parsed.quality_score,
            source_type: SourceType::Aggregator,
            payload_token: None,
        })
    }
}

fn parse_rfc822_or_rfc3339(s: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc2822(s)
        .or_else(|_| chrono::DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanTokens;

    fn plan() -> SearchPlan {
        SearchPlan {
            plan_type: PlanType::Movie,
            query: "Shawshank Redemption".into(),
            tokens: PlanTokens {
                imdb_id: Some("tt0111161".into()),
                ..Default::default()
            },
            strict_phrase: None,
            ascii_fallback_title: None,
        }
    }

    #[test]
    fn builds_url_with_imdb_token() {
        let client = AggregatorClient::new("https://agg.example".into(), "key".into(), 120);
        let url = client.build_url(&plan());
        assert!(url.contains("imdbId=tt0111161"));
        assert!(url.contains("categories=2000"));
    }

    #[test]
    fn circuit_breaker_short_circuits_after_trip() {
        let client = AggregatorClient::new("https://agg.example".into(), "key".into(), 120);
        assert!(!client.breaker.is_open());
        client.breaker.trip();
        assert!(client.breaker.is_open());
    }
}
