//! Stream Proxy: forwards ranged GET/HEAD playback requests to the mount
//! service's WebDAV file, rewriting headers the way a CDN edge would —
//! strip hop-by-hop, infer content type, set a sanitized
//! `Content-Disposition`, expose CORS — and falls back to a bundled "no
//! video" / "nzb failure" MP4 asset when the downstream fetch fails.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use reqwest::Client;

const HOP_BY_HOP_HEADERS: &[&str] =
    &["connection", "keep-alive", "proxy-authenticate", "proxy-authorization", "te", "trailers", "transfer-encoding", "upgrade"];

pub struct StreamProxy {
    client: Client,
}

impl Default for StreamProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamProxy {
    pub fn new() -> Self {
        Self { client: Client::builder().user_agent("usenet-catalog-adapter/1.0").build().expect("failed to build stream proxy HTTP client") }
    }

    /// Proxies a single GET/HEAD to `upstream_url`, forwarding the
    /// client's `Range` header verbatim and passing the upstream's
    /// status/headers/body straight through (sans hop-by-hop headers).
    pub async fn proxy(&self, method: &Method, upstream_url: &str, request_headers: &HeaderMap, filename: &str) -> Response {
        if method != Method::GET && method != Method::HEAD {
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }

        let mut req = self.client.request(method.clone(), upstream_url);
        if let Some(range) = request_headers.get(header::RANGE) {
            req = req.header(header::RANGE, range);
        }

        let upstream = match req.send().await {
            Ok(resp) => resp,
            Err(e) => return self.fallback_response(method, FallbackKind::NzbFailure, &format!("upstream request failed: {e}")),
        };

        if upstream.status().is_client_error() || upstream.status().is_server_error() {
            return self.fallback_response(method, FallbackKind::NzbFailure, &format!("upstream returned {}", upstream.status()));
        }

        let status = upstream.status();
        let mut headers = HeaderMap::new();
        for (name, value) in upstream.headers().iter() {
            if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }

        if headers.get(header::CONTENT_TYPE).map(|v| v == "application/octet-stream").unwrap_or(true) {
            let guessed = mime_guess::from_path(filename).first_or_octet_stream();
            if let Ok(value) = HeaderValue::from_str(guessed.as_ref()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
        }
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        if let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{}\"", sanitize_filename(filename))) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));

        let body = if method == Method::HEAD {
            Body::empty()
        } else {
            let stream = upstream.bytes_stream().map(|chunk| {
                chunk.map_err(|e| std::io::Error::other(format!("premature stream disconnect: {e}")))
            });
            Body::from_stream(stream)
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    /// Serves a bundled fallback MP4 in place of the real stream, tagging
    /// the original failure in `X-NZBDav-Failure` (HEAD honored). Public
    /// so the orchestrator can serve the "no video found" variant before
    /// a mount handle even exists to proxy against.
    pub fn fallback_response(&self, method: &Method, kind: FallbackKind, failure_reason: &str) -> Response {
        let payload = kind.payload();

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_str(&payload.len().to_string()).unwrap());
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        if let Ok(value) = HeaderValue::from_str(failure_reason) {
            headers.insert("x-nzbdav-failure", value);
        } else {
            headers.insert("x-nzbdav-failure", HeaderValue::from_static("unknown failure"));
        }

        let body = if *method == Method::HEAD { Body::empty() } else { Body::from(payload) };
        let mut response = Response::new(body);
        *response.status_mut() = StatusCode::OK;
        *response.headers_mut() = headers;
        response
    }
}

/// Which of the two bundled fallback assets to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    NzbFailure,
    NoVideoFound,
}

impl FallbackKind {
    /// Stub MP4 payloads: a minimal `ftyp` box is enough to identify the
    /// asset as an MP4 container to a player without shipping real bundled
    /// video assets through this tree.
    fn payload(self) -> &'static [u8] {
        const FTYP_STUB: &[u8] = &[
            0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm', 0x00, 0x00, 0x02, 0x00, b'i', b's', b'o', b'm',
            b'i', b's', b'o', b'2',
        ];
        match self {
            FallbackKind::NzbFailure | FallbackKind::NoVideoFound => FTYP_STUB,
        }
    }
}

/// Strips characters that would break a quoted `filename="..."` parameter.
fn sanitize_filename(name: &str) -> String {
    name.chars().filter(|c| !matches!(c, '"' | '\\' | '\r' | '\n')).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_quotes_and_control_chars() {
        assert_eq!(sanitize_filename("movie \"cut\".mkv"), "movie cut.mkv");
        assert_eq!(sanitize_filename("movie\r\n.mkv"), "movie.mkv");
    }
}
