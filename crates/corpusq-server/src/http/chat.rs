//! `POST /v1/chat/completions` (§4.11, §6): an OpenAI-compatible chat
//! endpoint backed by the orchestrator. Streaming responses relay the
//! orchestrator's `AgentEvent::Token` frames as `chat.completion.chunk`
//! SSE events; non-streaming responses await the full outcome and return
//! a single completion object, both terminated (or not) per the OpenAI
//! wire shape the teacher's own `whatsapp_http_server.rs` approximates
//! for its own (non-streaming) bridge response.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use corpusq_core::events::{self, AgentEvent};
use corpusq_core::orchestrator::{Orchestrator, RunRequest};
use corpusq_core::Source;

use crate::error::AppError;
use crate::http::headers::TenantHeader;
use crate::links;
use crate::state::AppState;

const ADVANCED_SELECTOR: &str = "[ADVANCED]";

#[derive(Debug, Deserialize)]
pub struct ChatMessageIn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct RagConfigOverride {
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub max_sources: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessageIn>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub rag_config: Option<RagConfigOverride>,
}

#[derive(Serialize)]
struct ChatCompletionMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatCompletionChoice {
    index: u32,
    message: ChatCompletionMessage,
    finish_reason: &'static str,
}

#[derive(Serialize)]
struct ChatCompletionResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<ChatCompletionChoice>,
    sources: Vec<Source>,
}

#[derive(Serialize)]
struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Serialize)]
struct ChunkChoice {
    index: u32,
    delta: Delta,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish_reason: Option<&'static str>,
}

#[derive(Serialize)]
struct ChatCompletionChunk {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sources: Vec<Source>,
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Splits the `[ADVANCED]` selector token off the last user message (§6),
/// returning whether it was present and the query text with it stripped.
fn extract_advanced_and_query(messages: &[ChatMessageIn]) -> (bool, String) {
    let last_user = messages.iter().rev().find(|m| m.role == "user");
    match last_user {
        Some(m) if m.content.trim_start().starts_with(ADVANCED_SELECTOR) => {
            (true, m.content.trim_start().trim_start_matches(ADVANCED_SELECTOR).trim_start().to_string())
        }
        Some(m) => (false, m.content.clone()),
        None => (false, String::new()),
    }
}

pub async fn handle_chat_completions(
    State(state): State<AppState>,
    TenantHeader(tenant_header): TenantHeader,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, AppError> {
    if req.messages.is_empty() {
        return Err(AppError::bad_request("messages must not be empty"));
    }

    let tenant = state.tenants.resolve(tenant_header.as_deref()).clone();
    let (advanced, query) = extract_advanced_and_query(&req.messages);
    if query.trim().is_empty() {
        return Err(AppError::bad_request("no user message to answer"));
    }

    let conversation_id = req
        .conversation_id
        .clone()
        .unwrap_or_else(|| corpusq_core::state::derive_conversation_id(&[query.clone()]));

    let run_request = RunRequest {
        conversation_id,
        query,
        tenant: tenant.clone(),
        advanced,
        model: Some(req.model.clone()),
    };

    let id = format!("chatcmpl-{}", corpusq_core::Uuid::new_v4());
    let created = unix_now();

    let overrides = req.rag_config.as_ref();
    let config = state.config_with_overrides(
        overrides.and_then(|o| o.top_k),
        overrides.and_then(|o| o.max_sources),
    );
    let orchestrator = Arc::new(Orchestrator::new(state.retriever.clone(), state.llm.clone(), config));

    if req.stream {
        Ok(stream_response(orchestrator, state.bind_host.clone(), run_request, id, created, req.model, tenant).await)
    } else {
        Ok(complete_response(orchestrator, state.bind_host.clone(), run_request, id, created, req.model, tenant).await?)
    }
}

async fn complete_response(
    orchestrator: Arc<Orchestrator>,
    bind_host: String,
    run_request: RunRequest,
    id: String,
    created: i64,
    model: String,
    tenant: corpusq_core::Tenant,
) -> Result<Response, AppError> {
    let (sink, mut stream) = events::channel(64);
    // Drain the event stream in the background so the orchestrator's
    // bounded sink never blocks on a caller that doesn't want events.
    tokio::spawn(async move { while stream.recv().await.is_some() {} });

    let outcome = orchestrator.run(run_request, sink).await.map_err(AppError::from)?;
    let sources = links::enrich_sources(outcome.sources, &tenant, &bind_host);

    let body = ChatCompletionResponse {
        id,
        object: "chat.completion",
        created,
        model,
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatCompletionMessage { role: "assistant".to_string(), content: outcome.content },
            finish_reason: "stop",
        }],
        sources,
    };
    Ok(Json(body).into_response())
}

async fn stream_response(
    orchestrator: Arc<Orchestrator>,
    bind_host: String,
    run_request: RunRequest,
    id: String,
    created: i64,
    model: String,
    tenant: corpusq_core::Tenant,
) -> Response {
    let (sink, mut events_rx) = events::channel(64);

    let run_handle = tokio::spawn(async move { orchestrator.run(run_request, sink).await });

    let sse_stream = async_stream::stream! {
        yield Ok::<Event, Infallible>(sse_json(&ChatCompletionChunk {
            id: id.clone(),
            object: "chat.completion.chunk",
            created,
            model: model.clone(),
            choices: vec![ChunkChoice { index: 0, delta: Delta { role: Some("assistant"), content: None }, finish_reason: None }],
            sources: Vec::new(),
        }));

        while let Some(event) = events_rx.recv().await {
            match event {
                AgentEvent::Token { content } => {
                    yield Ok(sse_json(&ChatCompletionChunk {
                        id: id.clone(),
                        object: "chat.completion.chunk",
                        created,
                        model: model.clone(),
                        choices: vec![ChunkChoice { index: 0, delta: Delta { role: None, content: Some(content) }, finish_reason: None }],
                        sources: Vec::new(),
                    }));
                }
                AgentEvent::Final { sources, .. } => {
                    let enriched = links::enrich_sources(sources, &tenant, &bind_host);
                    yield Ok(sse_json(&ChatCompletionChunk {
                        id: id.clone(),
                        object: "chat.completion.chunk",
                        created,
                        model: model.clone(),
                        choices: vec![ChunkChoice { index: 0, delta: Delta { role: None, content: None }, finish_reason: Some("stop") }],
                        sources: enriched,
                    }));
                }
                AgentEvent::Error { message, .. } => {
                    yield Ok(sse_json(&serde_json::json!({"error": {"code": "internal", "message": message}})));
                }
                _ => {}
            }
        }

        if let Ok(Err(e)) = run_handle.await {
            tracing::warn!(error = %e, "orchestrator run failed after streaming started");
        }

        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(sse_stream)
        .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)).text("keepalive"))
        .into_response()
}

fn sse_json<T: Serialize>(value: &T) -> Event {
    Event::default().json_data(value).unwrap_or_else(|_| Event::default().data("{}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advanced_selector_is_stripped_from_last_user_message() {
        let messages = vec![ChatMessageIn { role: "user".to_string(), content: "[ADVANCED] find the invoice".to_string() }];
        let (advanced, query) = extract_advanced_and_query(&messages);
        assert!(advanced);
        assert_eq!(query, "find the invoice");
    }

    #[test]
    fn plain_message_is_not_advanced() {
        let messages = vec![ChatMessageIn { role: "user".to_string(), content: "find the invoice".to_string() }];
        let (advanced, query) = extract_advanced_and_query(&messages);
        assert!(!advanced);
        assert_eq!(query, "find the invoice");
    }
}
