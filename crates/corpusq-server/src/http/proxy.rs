//! `POST /proxy/es` (§6, §11.2): a diagnostic passthrough to the lexical
//! backend's search, grounded in `original_source/agent_api/app/es_proxy.py`.
//! The reference system forwards the request body verbatim to a real
//! Elasticsearch `_search` endpoint for the active tenant's index; this
//! build's lexical backend is an embedded Tantivy index rather than a
//! separate HTTP service, so the same diagnostic intent is met by running
//! the request's query against it in-process and returning the hits or
//! `{"error": ...}` on failure. Diagnostic only — never on the
//! request-answering path.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::http::headers::TenantHeader;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct EsProxyRequest {
    pub query: String,
    #[serde(default = "default_size")]
    pub size: usize,
}

fn default_size() -> usize {
    10
}

#[derive(Serialize)]
pub struct EsProxyHit {
    pub path: String,
    pub snippet: String,
    pub score: f32,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum EsProxyResponse {
    Hits { hits: Vec<EsProxyHit> },
    Error { error: String },
}

pub async fn proxy_es(
    State(state): State<AppState>,
    TenantHeader(tenant_header): TenantHeader,
    Json(req): Json<EsProxyRequest>,
) -> Json<EsProxyResponse> {
    let tenant = state.tenants.resolve(tenant_header.as_deref());
    let lexical = state.lexical.clone();
    let ext_filter = tenant.ext_filter.clone();
    let query = req.query.clone();
    let size = req.size;

    let result = tokio::task::spawn_blocking(move || lexical.bm25_filtered(&query, &ext_filter, size)).await;

    let body = match result {
        Ok(Ok(hits)) => EsProxyResponse::Hits {
            hits: hits.into_iter().map(|h| EsProxyHit { path: h.path, snippet: h.snippet, score: h.score }).collect(),
        },
        Ok(Err(e)) => EsProxyResponse::Error { error: e.to_string() },
        Err(e) => EsProxyResponse::Error { error: e.to_string() },
    };
    Json(body)
}
