//! `GET /manifest.json`: the catalog-adapter descriptor clients fetch
//! before requesting streams.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct Manifest {
    id: String,
    version: String,
    name: String,
    description: String,
    types: Vec<String>,
    resources: Vec<String>,
    catalogs: Vec<serde_json::Value>,
    id_prefixes: Vec<String>,
    behavior_hints: BehaviorHints,
}

#[derive(Debug, Serialize)]
struct BehaviorHints {
    configurable: bool,
    configuration_required: bool,
}

pub async fn manifest(State(state): State<AppState>) -> Json<Manifest> {
    Json(Manifest {
        id: "community.usenet-catalog-adapter".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        name: state.config.addon_name.clone(),
        description: "Finds and streams Usenet releases via a mount service.".to_string(),
        types: vec!["movie".to_string(), "series".to_string()],
        resources: vec!["stream".to_string()],
        catalogs: Vec::new(),
        id_prefixes: vec!["tt".to_string()],
        behavior_hints: BehaviorHints {
            configurable: true,
            configuration_required: state.shared_secret().is_none(),
        },
    })
}
