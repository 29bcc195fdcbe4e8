//! Direct Newznab client: one instance per enabled `NEWZNAB_ENDPOINT_{ii}`
//! slot, speaking the de facto RSS-style Newznab search dialect.
//!
//! The XML parser is permissive and attribute-merged rather than a strict
//! typed deserialization — the dialect is inconsistent enough across
//! indexers that a manual `quick_xml` event loop (as used elsewhere in the
//! retrieved indexer-aggregator pack) tolerates more real-world payloads
//! than `serde-xml-rs`-style strict structs would.

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use rand::Rng;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use super::{now_ms, CircuitBreaker, IndexerClient};
use crate::config::NewznabEndpointConfig;
use crate::models::{PlanType, Release, SearchPlan, SourceType};
use crate::services::release_parser::parse_title;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: u32 = 2;

pub struct NewznabClient {
    client: Client,
    config: NewznabEndpointConfig,
    id: String,
    breaker: CircuitBreaker,
    filter_nzb_only: bool,
}

impl NewznabClient {
    pub fn new(config: NewznabEndpointConfig, backoff_seconds: u64, filter_nzb_only: bool) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .gzip(true)
            .build()
            .expect("failed to build newznab HTTP client");
        let id = config.id_str();
        Self {
            client,
            config,
            id,
            breaker: CircuitBreaker::new(backoff_seconds),
            filter_nzb_only,
        }
    }

    fn build_url(&self, plan: &SearchPlan) -> String {
        let t = match plan.plan_type {
            PlanType::Movie => "movie",
            PlanType::Series => "tvsearch",
            PlanType::Search => "search",
        };
        let mut url = format!(
            "{}{}?t={}&apikey={}&q={}",
            self.config.endpoint,
            self.config.api_path,
            t,
            urlencoding::encode(&self.config.api_key),
            urlencoding::encode(&plan.query),
        );
        if let Some(ref imdb) = plan.tokens.imdb_id {
            url.push_str(&format!("&imdbid={}", imdb.trim_start_matches("tt")));
        }
        if let Some(ref tvdb) = plan.tokens.tvdb_id {
            url.push_str(&format!("&tvdbid={}", tvdb));
        }
        if let Some(season) = plan.tokens.season {
            url.push_str(&format!("&season={}", season));
        }
        if let Some(episode) = plan.tokens.episode {
            url.push_str(&format!("&ep={}", episode));
        }
        url
    }

    async fn execute_with_retry(&self, url: &str) -> Result<String, String> {
        let mut attempt = 0;
        loop {
            let resp = self.client.get(url).send().await;
            match resp {
                Ok(r) if r.status().is_success() => {
                    return r.text().await.map_err(|e| format!("read body failed: {e}"));
                }
                Ok(r) if r.status() == StatusCode::UNAUTHORIZED || r.status() == StatusCode::FORBIDDEN => {
                    return Err(format!("newznab auth failure: {}", r.status()));
                }
                Ok(r) if is_transient_status(r.status()) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    sleep_backoff(attempt).await;
                    continue;
                }
                Ok(r) => return Err(format!("newznab returned {}", r.status())),
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    sleep_backoff(attempt).await;
                    continue;
                }
                Err(e) => return Err(format!("newznab request failed: {e}")),
            }
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

async fn sleep_backoff(attempt: u32) {
    let base_ms = 200u64 * 2u64.pow(attempt);
    let jitter_pct = rand::thread_rng().gen_range(-30..=30);
    let jittered = (base_ms as i64 + base_ms as i64 * jitter_pct / 100).max(0) as u64;
    tokio::time::sleep(Duration::from_millis(jittered)).await;
}

#[async_trait]
impl IndexerClient for NewznabClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.config.name
    }

    fn is_paid(&self) -> bool {
        self.config.paid
    }

    async fn search(&self, plan: &SearchPlan) -> (Vec<Release>, Vec<String>) {
        if self.breaker.is_open() {
            return (Vec::new(), vec![format!("{} circuit open, skipping", self.config.name)]);
        }

        let url = self.build_url(plan);
        let body = match self.execute_with_retry(&url).await {
            Ok(b) => b,
            Err(e) => {
                self.breaker.trip();
                return (Vec::new(), vec![e]);
            }
        };

        match parse_newznab_response(&body, &self.config, self.filter_nzb_only) {
            Ok((releases, warnings)) => (releases, warnings),
            Err(e) => (Vec::new(), vec![format!("{}: {}", self.config.name, e)]),
        }
    }
}

trait ConfigIdExt {
    fn id_str(&self) -> String;
}
impl ConfigIdExt for NewznabEndpointConfig {
    fn id_str(&self) -> String {
        format!("newznab-{}", self.slot)
    }
}

#[derive(Default)]
struct ItemBuilder {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    enclosure_url: Option<String>,
    enclosure_length: Option<u64>,
    pub_date: Option<String>,
    size_attr: Option<u64>,
}

impl ItemBuilder {
    fn set_newznab_attr(&mut self, name: &str, value: &str) {
        match name {
            "size" => self.size_attr = value.parse().ok(),
            _ => {}
        }
    }

    fn download_url(&self) -> Option<String> {
        self.enclosure_url
            .clone()
            .or_else(|| self.link.clone())
            .or_else(|| self.guid.clone())
    }

    fn size(&self) -> u64 {
        self.size_attr.or(self.enclosure_length).unwrap_or(0)
    }

    fn build(self) -> Option<(String, String, u64, Option<String>)> {
        let title = self.title?;
        let url = self.download_url()?;
        let size = self.size();
        Some((title, url, size, self.pub_date))
    }
}

/// Permissive RSS/Newznab XML parse: manual event loop over `<item>`
/// blocks, merging `<newznab:attr name="" value=""/>` and
/// `<enclosure url="" length=""/>` rather than deserializing a strict
/// struct shape.
fn parse_newznab_response(
    xml: &str,
    config: &NewznabEndpointConfig,
    filter_nzb_only: bool,
) -> Result<(Vec<Release>, Vec<String>), String> {
    if xml.contains("<error") {
        return Err(extract_error_description(xml).unwrap_or_else(|| "indexer reported an error".into()));
    }

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut releases = Vec::new();
    let mut warnings = Vec::new();
    let mut in_item = false;
    let mut current_tag = String::new();
    let mut current: Option<ItemBuilder> = None;
    let mut text_buf = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "item" {
                    in_item = true;
                    current = Some(ItemBuilder::default());
                } else if in_item {
                    current_tag = name;
                    text_buf.clear();
                }
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if !in_item {
                    continue;
                }
                let Some(item) = current.as_mut() else { continue };
                let mut attr_name = None;
                let mut attr_value = None;
                let mut url = None;
                let mut length = None;
                for attr in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                    let val = attr.decode_and_unescape_value(reader.decoder()).unwrap_or_default().to_string();
                    match key.as_str() {
                        "name" => attr_name = Some(val),
                        "value" => attr_value = Some(val),
                        "url" => url = Some(val),
                        "length" => length = val.parse().ok(),
                        _ => {}
                    }
                }
                if name.ends_with("attr") {
                    if let (Some(n), Some(v)) = (attr_name, attr_value) {
                        item.set_newznab_attr(&n, &v);
                    }
                } else if name == "enclosure" {
                    item.enclosure_url = url;
                    item.enclosure_length = length;
                }
            }
            Ok(Event::Text(e)) => {
                if in_item {
                    text_buf.push_str(&e.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "item" {
                    in_item = false;
                    if let Some(item) = current.take() {
                        match item.build() {
                            Some((title, url, size, pub_date)) => {
                                if filter_nzb_only && !looks_like_nzb_url(&url) {
                                    continue;
                                }
                                releases.push(build_release(config, title, url, size, pub_date));
                            }
                            None => warnings.push("item missing title or download url".to_string()),
                        }
                    }
                } else if in_item && !text_buf.is_empty() {
                    if let Some(item) = current.as_mut() {
                        match current_tag.as_str() {
                            "title" => item.title = Some(text_buf.clone()),
                            "link" => item.link = Some(text_buf.clone()),
                            "guid" => item.guid = Some(text_buf.clone()),
                            "pubDate" => item.pub_date = Some(text_buf.clone()),
                            _ => {}
                        }
                    }
                    text_buf.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("xml parse error: {e}")),
            _ => {}
        }
        buf.clear();
    }

    Ok((releases, warnings))
}

fn extract_error_description(xml: &str) -> Option<String> {
    let idx = xml.find("description=\"")?;
    let rest = &xml[idx + 14..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

fn looks_like_nzb_url(url: &str) -> bool {
    url.contains(".nzb") || url.contains("mode=getnzb") || url.contains("t=getnzb")
}

fn build_release(
    config: &NewznabEndpointConfig,
    title: String,
    url: String,
    size: u64,
    pub_date: Option<String>,
) -> Release {
    let parsed = parse_title(&title);
    let publish_instant_ms = pub_date
        .as_deref()
        .and_then(parse_rfc822_date)
        .unwrap_or_else(now_ms);
    let age_days = (now_ms() - publish_instant_ms) as f64 / 86_400_000.0;
    Release {
        raw_title: title,
        download_url: url,
        indexer_name: config.name.clone(),
        indexer_id: config.id_str(),
        size_bytes: size,
        publish_instant_ms,
        age_days,
        resolution: parsed.resolution,
        languages: parsed.languages,
        quality_score: parsed.quality_score,
        source_type: SourceType::Direct,
        payload_token: None,
    }
}

/// Tries a handful of common formats before falling back to RFC 2822.
fn parse_rfc822_date(s: &str) -> Option<i64> {
    const FORMATS: &[&str] = &[
        "%a, %d %b %Y %H:%M:%S %z",
        "%a, %d %b %Y %H:%M:%S GMT",
        "%d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%z",
        "%Y-%m-%d %H:%M:%S",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = chrono::DateTime::parse_from_str(s, fmt) {
            return Some(dt.timestamp_millis());
        }
    }
    chrono::DateTime::parse_from_rfc2822(s).ok().map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> NewznabEndpointConfig {
        NewznabEndpointConfig {
            slot: 1,
            endpoint: "https://idx.example".into(),
            api_key: "key123".into(),
            api_path: "/api".into(),
            name: "TestIndexer".into(),
            enabled: true,
            paid: true,
        }
    }

    #[test]
    fn parses_rfc822_date() {
        let ms = parse_rfc822_date("Mon, 01 Jan 2024 12:00:00 +0000").unwrap();
        assert!(ms > 0);
    }

    #[test]
    fn parses_items_with_enclosure_and_attrs() {
        let xml = r#"<?xml version="1.0"?>
        <rss><channel>
        <item>
          <title>Movie.2024.1080p.BluRay.x264</title>
          <guid>https://idx.example/details/123</guid>
          <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
          <enclosure url="https://idx.example/getnzb/123.nzb" length="5000000000"/>
          <newznab:attr name="size" value="5100000000"/>
        </item>
        </channel></rss>"#;
        let (releases, warnings) = parse_newznab_response(xml, &cfg(), false).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].size_bytes, 5_100_000_000);
        assert_eq!(releases[0].resolution, "1080p");
    }

    #[test]
    fn detects_error_element() {
        let xml = r#"<error code="100" description="Invalid API Key"/>"#;
        let err = parse_newznab_response(xml, &cfg(), false).unwrap_err();
        assert_eq!(err, "Invalid API Key");
    }

    #[test]
    fn filters_non_nzb_urls_when_configured() {
        let xml = r#"<rss><channel><item>
          <title>Movie.2024.1080p</title>
          <link>https://idx.example/details/123</link>
          <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
        </item></channel></rss>"#;
        let (releases, _) = parse_newznab_response(xml, &cfg(), true).unwrap();
        assert!(releases.is_empty());
    }
}
