//! Easynews adapter: a proprietary JSON search with its own basic-auth
//! session and an opaque payload-token download scheme instead of a real
//! download URL.
//!
//! Grounded structurally on the aggregator/direct clients in this module
//! (same retry/circuit-breaker shape) but the response contract, query
//! sanitization, and strict-mode filtering are specific to this adapter.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;

use super::{now_ms, CircuitBreaker, IndexerClient};
use crate::models::{PlanType, Release, SearchPlan, SourceType};
use crate::services::release_parser::parse_title;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MIN_SIZE_BYTES: u64 = 100 * 1024 * 1024;
const SEARCH_BASE_URL: &str = "https://members.easynews.com/2.0/search/solr-search/advanced";

const DISALLOWED_EXTENSIONS: &[&str] = &[
    "rar", "zip", "exe", "jpg", "jpeg", "png", "gif", "bmp", "webp",
];

pub struct EasynewsClient {
    client: reqwest::Client,
    username: String,
    password: String,
    payload_secret: String,
    breaker: CircuitBreaker,
    min_size_bytes: u64,
}

impl EasynewsClient {
    /// `payload_secret` signs the opaque download-payload token handed back
    /// in stream results — must be the same secret `/easynews/nzb` and
    /// `/nzb/stream` verify against (the addon's shared secret), not the
    /// Easynews account credentials.
    pub fn new(username: String, password: String, payload_secret: String, backoff_seconds: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build easynews HTTP client");
        Self {
            client,
            username,
            password,
            payload_secret,
            breaker: CircuitBreaker::new(backoff_seconds),
            min_size_bytes: DEFAULT_MIN_SIZE_BYTES,
        }
    }

    /// `POST /2.0/api/dl-nzb`: trades a hash+filename (recovered from a
    /// decoded payload token) for the NZB body backing that file.
    pub async fn fetch_nzb(&self, hash: &str, filename: &str) -> Result<Vec<u8>, String> {
        let resp = self
            .client
            .post("https://members.easynews.com/2.0/api/dl-nzb")
            .basic_auth(&self.username, Some(&self.password))
            .form(&[("hash", hash), ("filename", filename)])
            .send()
            .await
            .map_err(|e| format!("easynews nzb request failed: {e}"))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err("easynews auth failure".to_string());
        }
        if !resp.status().is_success() {
            return Err(format!("easynews nzb endpoint returned {}", resp.status()));
        }
        resp.bytes().await.map(|b| b.to_vec()).map_err(|e| format!("easynews nzb body read failed: {e}"))
    }

    async fn execute(&self, query: &str) -> Result<Vec<EasynewsItem>, String> {
        let resp = self
            .client
            .get(SEARCH_BASE_URL)
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("gps", query), ("fly", "2"), ("sS", "1")])
            .send()
            .await
            .map_err(|e| format!("easynews request failed: {e}"))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err("easynews auth failure".to_string());
        }
        if !resp.status().is_success() {
            return Err(format!("easynews returned {}", resp.status()));
        }

        let payload: EasynewsResponse = resp
            .json()
            .await
            .map_err(|e| format!("malformed easynews payload: {e}"))?;
        Ok(payload.data.unwrap_or_default())
    }
}

/// Collapses punctuation runs to single spaces and spells out `&` so the
/// query survives Easynews's tokenizer — mirrors the sanitization the
/// direct Newznab fuzzy search needs but applied up front here instead.
pub fn sanitize_query(raw: &str) -> String {
    let spelled = raw.replace('&', " and ");
    let mut out = String::with_capacity(spelled.len());
    let mut last_was_space = false;
    for c in spelled.chars() {
        if c.is_alphanumeric() {
            out.push(c);
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_disallowed_extension(filename: &str) -> bool {
    filename
        .rsplit('.')
        .next()
        .map(|ext| DISALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Strict mode requires the sanitized query tokens to appear as a
/// contiguous subsequence within the candidate title's tokens, plus
/// year/season/episode agreement when the plan carries them.
fn passes_strict_mode(query_tokens: &[String], title: &str, plan: &SearchPlan) -> bool {
    let title_lower = title.to_lowercase();
    let title_tokens: Vec<&str> = title_lower.split_whitespace().collect();

    let contiguous = query_tokens.is_empty()
        || title_tokens
            .windows(query_tokens.len().max(1))
            .any(|window| window.iter().zip(query_tokens.iter()).all(|(w, q)| *w == q));
    if !contiguous {
        return false;
    }

    if let Some(season) = plan.tokens.season {
        let season_tag = format!("s{:02}", season);
        if !title_lower.contains(&season_tag) {
            return false;
        }
    }
    if let Some(episode) = plan.tokens.episode {
        let ep_tag = format!("e{:02}", episode);
        if !title_lower.contains(&ep_tag) {
            return false;
        }
    }
    true
}

/// Opaque base64url token a client later hands to `/easynews/nzb` to
/// reconstruct the form-post download without exposing raw Easynews
/// session details in the stream list.
#[derive(serde::Serialize, serde::Deserialize)]
struct PayloadClaims {
    hash: String,
    filename: String,
    ext: String,
    sig: String,
}

fn build_payload_token(item: &EasynewsItem, secret: &str) -> String {
    let filename = item.filename();
    let ext = filename.rsplit('.').next().unwrap_or("").to_string();
    let mut hasher = Sha256::new();
    hasher.update(item.hash.as_bytes());
    hasher.update(filename.as_bytes());
    hasher.update(secret.as_bytes());
    let sig = hex::encode(hasher.finalize());

    let claims = PayloadClaims {
        hash: item.hash.clone(),
        filename,
        ext,
        sig,
    };
    let json = serde_json::to_vec(&claims).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decodes a payload token previously issued by [`build_payload_token`],
/// verifying the signature before a download is attempted.
pub fn decode_payload_token(token: &str, secret: &str) -> Result<(String, String), String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| format!("invalid payload token: {e}"))?;
    let claims: PayloadClaims =
        serde_json::from_slice(&bytes).map_err(|e| format!("malformed payload token: {e}"))?;

    let mut hasher = Sha256::new();
    hasher.update(claims.hash.as_bytes());
    hasher.update(claims.filename.as_bytes());
    hasher.update(secret.as_bytes());
    let expected = hex::encode(hasher.finalize());
    if expected != claims.sig {
        return Err("payload token signature mismatch".to_string());
    }
    Ok((claims.hash, claims.filename))
}

#[async_trait]
impl IndexerClient for EasynewsClient {
    fn id(&self) -> &str {
        "easynews"
    }

    fn display_name(&self) -> &str {
        "Easynews"
    }

    async fn search(&self, plan: &SearchPlan) -> (Vec<Release>, Vec<String>) {
        if self.breaker.is_open() {
            return (Vec::new(), vec!["easynews circuit open, skipping".to_string()]);
        }

        let sanitized = sanitize_query(&plan.query);
        let items = match self.execute(&sanitized).await {
            Ok(items) => items,
            Err(e) => {
                self.breaker.trip();
                return (Vec::new(), vec![e]);
            }
        };

        let strict = matches!(plan.plan_type, PlanType::Movie | PlanType::Series) && !plan.query.is_empty();
        let query_tokens: Vec<String> = sanitized
            .to_lowercase()
            .split_whitespace()
            .map(String::from)
            .collect();

        let mut seen_hashes = HashSet::new();
        let mut releases = Vec::new();
        for item in items {
            if !seen_hashes.insert(item.hash.clone()) {
                continue;
            }
            let filename = item.filename();
            if item.size_bytes() < self.min_size_bytes {
                continue;
            }
            if has_disallowed_extension(&filename) {
                continue;
            }
            if strict && !passes_strict_mode(&query_tokens, &filename, plan) {
                continue;
            }

            let parsed = parse_title(&filename);
            let payload_token = build_payload_token(&item, &self.payload_secret);
            releases.push(Release {
                raw_title: filename,
                download_url: String::new(),
                indexer_name: "Easynews".to_string(),
                indexer_id: "easynews".to_string(),
                size_bytes: item.size_bytes(),
                publish_instant_ms: now_ms(),
                age_days: 0.0,
                resolution: parsed.resolution,
                languages: parsed.languages,
                quality_score: parsed.quality_score,
                source_type: SourceType::Easynews,
                payload_token: Some(payload_token),
            });
        }

        (releases, Vec::new())
    }
}

#[derive(Debug, Deserialize, Default)]
struct EasynewsResponse {
    #[serde(default)]
    data: Option<Vec<EasynewsItem>>,
}

#[derive(Debug, Clone, Deserialize)]
struct EasynewsItem {
    #[serde(rename = "0")]
    hash: String,
    #[serde(rename = "10", default)]
    raw_filename: Option<String>,
    #[serde(rename = "fname", default)]
    fname: Option<String>,
    #[serde(rename = "rawSize", default)]
    raw_size: Option<String>,
    #[serde(rename = "4", default)]
    ext: Option<String>,
}

impl EasynewsItem {
    fn filename(&self) -> String {
        self.fname
            .clone()
            .or_else(|| self.raw_filename.clone())
            .unwrap_or_else(|| self.hash.clone())
    }

    fn size_bytes(&self) -> u64 {
        self.raw_size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanTokens;

    #[test]
    fn sanitizes_punctuation_and_ampersand() {
        assert_eq!(sanitize_query("Tom & Jerry: The Movie!"), "tom and jerry the movie");
    }

    #[test]
    fn flags_disallowed_extensions() {
        assert!(has_disallowed_extension("movie.part1.rar"));
        assert!(!has_disallowed_extension("movie.mkv"));
    }

    #[test]
    fn strict_mode_requires_contiguous_tokens() {
        let plan = SearchPlan {
            plan_type: PlanType::Movie,
            query: "the matrix".into(),
            tokens: PlanTokens::default(),
            strict_phrase: None,
            ascii_fallback_title: None,
        };
        let tokens = vec!["the".to_string(), "matrix".to_string()];
        assert!(passes_strict_mode(&tokens, "The.Matrix.1999.1080p.mkv", &plan));
        assert!(!passes_strict_mode(&tokens, "Matrix.Reloaded.The.1999.mkv", &plan));
    }

    #[test]
    fn payload_token_round_trips_and_detects_tamper() {
        let item = EasynewsItem {
            hash: "abc123".into(),
            raw_filename: None,
            fname: Some("Movie.2024.1080p.mkv".into()),
            raw_size: Some("123456".into()),
            ext: Some("mkv".into()),
        };
        let token = build_payload_token(&item, "secret");
        let (hash, filename) = decode_payload_token(&token, "secret").unwrap();
        assert_eq!(hash, "abc123");
        assert_eq!(filename, "Movie.2024.1080p.mkv");

        assert!(decode_payload_token(&token, "wrong-secret").is_err());
    }
}
