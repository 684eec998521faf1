//! Models endpoint handler
//!
//! GET /v1/models lists every declared model name in Anthropic list format,
//! in tier order. A name declared by more than one backend is listed once,
//! under the lowest tier.

use crate::handlers::AppState;
use axum::{Json, extract::State};
use serde::Serialize;
use std::collections::HashSet;

/// Declared models carry no real creation date
const CREATED_AT: &str = "2025-01-01T00:00:00Z";

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub data: Vec<ModelInfo>,
    pub has_more: bool,
    pub first_id: Option<String>,
    pub last_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub display_name: String,
    pub created_at: &'static str,
}

/// GET /v1/models handler
pub async fn handler(State(state): State<AppState>) -> Json<ModelList> {
    let config = state.config();
    let mut seen = HashSet::new();
    let mut data = Vec::new();

    for tier in config.declared_tiers() {
        let Some(backend) = config.backend(tier) else {
            continue;
        };
        for model in backend.models() {
            if !seen.insert(model.as_str()) {
                continue;
            }
            data.push(ModelInfo {
                kind: "model",
                id: model.clone(),
                display_name: format!("{} · {} ({})", tier, model, backend.name()),
                created_at: CREATED_AT,
            });
        }
    }

    tracing::debug!(total_models = data.len(), "Listing declared models");

    Json(ModelList {
        first_id: data.first().map(|m| m.id.clone()),
        last_id: data.last().map(|m| m.id.clone()),
        has_more: false,
        data,
    })
}
