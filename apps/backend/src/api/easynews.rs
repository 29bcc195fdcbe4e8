//! `GET /easynews/nzb`: trades an opaque payload token for the NZB body
//! Easynews backs it with.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::services::indexer::easynews::decode_payload_token;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct EasynewsNzbQuery {
    pub payload: String,
}

pub async fn fetch_nzb(State(state): State<AppState>, Query(query): Query<EasynewsNzbQuery>) -> Result<Response> {
    let client = state.easynews_client().ok_or_else(|| AppError::internal("easynews not configured"))?;
    let secret = state.config.addon_shared_secret.as_deref().unwrap_or("");

    let (hash, filename) = decode_payload_token(&query.payload, secret).map_err(AppError::BadRequest)?;
    let body = client.fetch_nzb(&hash, &filename).await.map_err(AppError::NzbFetchFailure)?;

    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/x-nzb")], body).into_response())
}
