//! `GET /v1/models` and `GET /health` (§6).

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct ModelEntry {
    id: String,
    object: &'static str,
}

#[derive(Serialize)]
struct ModelsResponse {
    object: &'static str,
    data: Vec<ModelEntry>,
}

/// Lists the configured answer/strategy/analysis models under the
/// `rag-` prefix the request's `model` field may carry (§9's resolved
/// open question on model selection).
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let mut ids = vec![
        state.config.models.llm_answer_model.clone(),
        state.config.models.llm_strategy_model.clone(),
        state.config.models.llm_analysis_model.clone(),
    ];
    ids.sort();
    ids.dedup();

    let data = ids.into_iter().map(|id| ModelEntry { id: format!("rag-{id}"), object: "model" }).collect();
    Json(ModelsResponse { object: "list", data })
}

#[derive(Serialize)]
pub struct HealthResponse {
    ok: bool,
    service: &'static str,
    version: &'static str,
    time: i64,
    models: Vec<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        service: "corpusq-server",
        version: env!("CARGO_PKG_VERSION"),
        time: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0),
        models: vec![state.config.models.llm_answer_model.clone()],
    })
}
