//! Mount service client: hands a download URL or a verified NZB body to
//! the downstream mount daemon (`addurl`/`addfile`), polls its history
//! endpoint until the job settles, then walks the resulting WebDAV tree
//! for the file to stream.
//!
//! HTTP shape follows the same `reqwest::Client` builder convention as the
//! indexer clients; WebDAV directory listing is parsed with `quick_xml`
//! the way the NZB parser reads its own XML.

use std::collections::VecDeque;
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::multipart;
use reqwest::Client;

const HISTORY_POLL_INTERVAL: Duration = Duration::from_secs(2);
const HISTORY_DEADLINE: Duration = Duration::from_secs(80);
const WEBDAV_MAX_DEPTH: u32 = 6;

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("mount service request failed: {0}")]
    Request(String),
    #[error("mount job failed: {0}")]
    JobFailed(String),
    #[error("mount job did not complete within the poll deadline")]
    Timeout,
    #[error("no playable video file found on the mount")]
    NoVideoFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobStatus {
    Queued,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PlaybackTarget {
    pub webdav_path: String,
    pub filename: String,
    pub size_bytes: u64,
}

pub struct MountClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    webdav_url: String,
    webdav_user: Option<String>,
    webdav_pass: Option<String>,
}

impl MountClient {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        webdav_url: String,
        webdav_user: Option<String>,
        webdav_pass: Option<String>,
    ) -> Self {
        let client = Client::builder()
            .user_agent("usenet-catalog-adapter/1.0")
            .build()
            .expect("failed to build mount client HTTP client");
        Self { client, base_url, api_key, webdav_url, webdav_user, webdav_pass }
    }

    /// Hands the NZB to the mount service: `addfile` (multipart) when the
    /// caller already has the verified bytes, `addurl` otherwise.
    pub async fn submit(
        &self,
        download_url: &str,
        verified_body: Option<&[u8]>,
        category: &str,
    ) -> Result<String, MountError> {
        if let Some(body) = verified_body {
            self.addfile(body, category).await
        } else {
            self.addurl(download_url, category).await
        }
    }

    async fn addfile(&self, body: &[u8], category: &str) -> Result<String, MountError> {
        let part = multipart::Part::bytes(body.to_vec()).file_name("release.nzb");
        let form = multipart::Form::new().part("file", part).text("category", category.to_string());

        let mut req = self.client.post(format!("{}/api/addfile", self.base_url)).multipart(form);
        if let Some(ref key) = self.api_key {
            req = req.header("X-Api-Key", key);
        }

        let resp = req.send().await.map_err(|e| MountError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MountError::Request(format!("addfile returned {}", resp.status())));
        }
        let body: AddJobResponse = resp.json().await.map_err(|e| MountError::Request(e.to_string()))?;
        Ok(body.job_id)
    }

    async fn addurl(&self, url: &str, category: &str) -> Result<String, MountError> {
        let mut req = self
            .client
            .post(format!("{}/api/addurl", self.base_url))
            .query(&[("url", url), ("category", category)]);
        if let Some(ref key) = self.api_key {
            req = req.header("X-Api-Key", key);
        }

        let resp = req.send().await.map_err(|e| MountError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MountError::Request(format!("addurl returned {}", resp.status())));
        }
        let body: AddJobResponse = resp.json().await.map_err(|e| MountError::Request(e.to_string()))?;
        Ok(body.job_id)
    }

    /// Polls `/api/history/:id` at ~2s intervals until `completed`/`failed`
    /// or the ~80s deadline elapses.
    pub async fn await_completion(&self, job_id: &str) -> Result<String, MountError> {
        let deadline = tokio::time::Instant::now() + HISTORY_DEADLINE;
        loop {
            let (status, mount_path, error) = self.poll_history(job_id).await?;
            match status {
                JobStatus::Completed => {
                    return mount_path.ok_or_else(|| MountError::JobFailed("completed without a mount path".into()))
                }
                JobStatus::Failed => return Err(MountError::JobFailed(error.unwrap_or_else(|| "unknown".into()))),
                JobStatus::Queued => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MountError::Timeout);
            }
            tokio::time::sleep(HISTORY_POLL_INTERVAL).await;
        }
    }

    async fn poll_history(&self, job_id: &str) -> Result<(JobStatus, Option<String>, Option<String>), MountError> {
        let mut req = self.client.get(format!("{}/api/history/{job_id}", self.base_url));
        if let Some(ref key) = self.api_key {
            req = req.header("X-Api-Key", key);
        }
        let resp = req.send().await.map_err(|e| MountError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MountError::Request(format!("history returned {}", resp.status())));
        }
        let body: HistoryResponse = resp.json().await.map_err(|e| MountError::Request(e.to_string()))?;
        let status = match body.status.as_str() {
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Queued,
        };
        Ok((status, body.mount_path, body.error))
    }

    /// Breadth-first WebDAV walk (PROPFIND depth 1 per level, capped at
    /// `WEBDAV_MAX_DEPTH`) for the largest video file, optionally filtered
    /// by an episode-matching substring.
    pub async fn find_playback_target(
        &self,
        mount_path: &str,
        episode_match: Option<&str>,
    ) -> Result<PlaybackTarget, MountError> {
        let mut frontier = VecDeque::new();
        frontier.push_back((mount_path.to_string(), 0u32));
        let mut best: Option<PlaybackTarget> = None;

        while let Some((path, depth)) = frontier.pop_front() {
            if depth > WEBDAV_MAX_DEPTH {
                continue;
            }
            let entries = self.propfind(&path).await?;
            for entry in entries {
                if entry.is_collection {
                    frontier.push_back((entry.href, depth + 1));
                    continue;
                }
                if !is_video_file(&entry.href) {
                    continue;
                }
                if let Some(needle) = episode_match {
                    if !entry.href.to_lowercase().contains(&needle.to_lowercase()) {
                        continue;
                    }
                }
                if best.as_ref().map(|b| entry.size_bytes > b.size_bytes).unwrap_or(true) {
                    let filename = entry.href.rsplit('/').next().unwrap_or(&entry.href).to_string();
                    best = Some(PlaybackTarget { webdav_path: entry.href, filename, size_bytes: entry.size_bytes });
                }
            }
        }

        best.ok_or(MountError::NoVideoFound)
    }

    /// Absolute WebDAV URL the stream proxy forwards ranged requests to.
    pub fn webdav_file_url(&self, target: &PlaybackTarget) -> String {
        format!("{}{}", self.webdav_url, target.webdav_path)
    }

    async fn propfind(&self, path: &str) -> Result<Vec<WebdavEntry>, MountError> {
        let url = format!("{}{}", self.webdav_url, path);
        let mut req = self
            .client
            .request(reqwest::Method::from_bytes(b"PROPFIND").unwrap(), &url)
            .header("Depth", "1");
        if let (Some(user), Some(pass)) = (&self.webdav_user, &self.webdav_pass) {
            req = req.basic_auth(user, Some(pass));
        }
        let resp = req.send().await.map_err(|e| MountError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MountError::Request(format!("propfind returned {}", resp.status())));
        }
        let text = resp.text().await.map_err(|e| MountError::Request(e.to_string()))?;
        Ok(parse_propfind_response(&text, path))
    }
}

#[derive(serde::Deserialize)]
struct AddJobResponse {
    job_id: String,
}

#[derive(serde::Deserialize)]
struct HistoryResponse {
    status: String,
    mount_path: Option<String>,
    error: Option<String>,
}

struct WebdavEntry {
    href: String,
    is_collection: bool,
    size_bytes: u64,
}

const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "mov", "avi", "ts", "m4v", "mpg", "mpeg", "wmv", "flv", "webm"];

fn is_video_file(href: &str) -> bool {
    href.rsplit('.').next().map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str())).unwrap_or(false)
}

fn parse_propfind_response(xml: &str, request_path: &str) -> Vec<WebdavEntry> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut current_href: Option<String> = None;
    let mut current_size: u64 = 0;
    let mut is_collection = false;
    let mut in_text_field: Option<&'static str> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e.name().as_ref());
                match name.as_str() {
                    "href" => in_text_field = Some("href"),
                    "getcontentlength" => in_text_field = Some("size"),
                    "collection" => is_collection = true,
                    "response" => {
                        current_href = None;
                        current_size = 0;
                        is_collection = false;
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                match in_text_field {
                    Some("href") => current_href = Some(text),
                    Some("size") => current_size = text.trim().parse().unwrap_or(0),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let name = local_name(&e.name().as_ref());
                if name == "response" {
                    if let Some(href) = current_href.take() {
                        if href.trim_end_matches('/') != request_path.trim_end_matches('/') {
                            entries.push(WebdavEntry { href, is_collection, size_bytes: current_size });
                        }
                    }
                }
                in_text_field = None;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    entries
}

fn local_name(qualified: &&[u8]) -> String {
    let s = String::from_utf8_lossy(qualified);
    s.rsplit(':').next().unwrap_or(&s).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROPFIND_SAMPLE: &str = r#"<?xml version="1.0"?>
    <d:multistatus xmlns:d="DAV:">
      <d:response>
        <d:href>/movie/</d:href>
        <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
      </d:response>
      <d:response>
        <d:href>/movie/sample.mkv</d:href>
        <d:propstat><d:prop><d:getcontentlength>1048576</d:getcontentlength></d:prop></d:propstat>
      </d:response>
      <d:response>
        <d:href>/movie/movie.mkv</d:href>
        <d:propstat><d:prop><d:getcontentlength>4294967296</d:getcontentlength></d:prop></d:propstat>
      </d:response>
    </d:multistatus>"#;

    #[test]
    fn propfind_parse_skips_self_entry_and_keeps_files() {
        let entries = parse_propfind_response(PROPFIND_SAMPLE, "/movie");
        assert_eq!(entries.len(), 2);
        assert!(!entries.iter().any(|e| e.href == "/movie/"));
        assert!(entries.iter().any(|e| e.href == "/movie/movie.mkv" && e.size_bytes == 4_294_967_296));
    }

    #[test]
    fn video_extension_detection_is_case_insensitive() {
        assert!(is_video_file("/x/Movie.MKV"));
        assert!(!is_video_file("/x/readme.nfo"));
    }
}
