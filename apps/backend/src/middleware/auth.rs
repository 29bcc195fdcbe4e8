//! Shared-secret authentication middleware.
//!
//! The adapter has no user accounts; every route in spec is reachable
//! either as `/manifest.json` (secret passed via header/query, for clients
//! that support it) or as `/:token/manifest.json` (secret embedded in the
//! install URL, for Stremio-style clients that don't). A request without a
//! matching secret never reaches the handler — in particular, never
//! triggers a downstream search.

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};

use crate::error::{AppError, Result};
use crate::AppState;

/// Path segments that are route names, never a token — lets the same
/// handler set be mounted at both `/x` and `/:token/x`.
const RESERVED_SEGMENTS: &[&str] = &["manifest.json", "stream", "nzb", "easynews", "health"];

fn path_token(path: &str) -> Option<&str> {
    let first = path.trim_start_matches('/').split('/').next()?;
    if first.is_empty() || RESERVED_SEGMENTS.contains(&first) {
        None
    } else {
        Some(first)
    }
}

fn query_token(query: &str) -> Option<&str> {
    query.split('&').find_map(|pair| pair.strip_prefix("token=").filter(|v| !v.is_empty()))
}

pub async fn shared_secret_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response> {
    let Some(secret) = state.shared_secret() else {
        return Ok(next.run(req).await);
    };

    let from_path = path_token(req.uri().path());
    let from_query = req.uri().query().and_then(query_token);
    let from_header = req.headers().get("x-addon-token").and_then(|v| v.to_str().ok());

    let provided = from_path.or(from_query).or(from_header);
    if provided != Some(secret) {
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_token_ignores_reserved_route_names() {
        assert_eq!(path_token("/manifest.json"), None);
        assert_eq!(path_token("/stream/movie/tt1.json"), None);
        assert_eq!(path_token("/abc123/manifest.json"), Some("abc123"));
    }

    #[test]
    fn query_token_reads_token_param() {
        assert_eq!(query_token("downloadUrl=x&token=secret"), Some("secret"));
        assert_eq!(query_token("downloadUrl=x"), None);
    }
}
