//! Router assembly (§6): one axum `Router` wiring every endpoint onto
//! shared `AppState`, CORS opened the way the teacher's own
//! `whatsapp_http_server.rs` opens it for its local bridge, plus a
//! request/response trace layer.

pub mod chat;
pub mod headers;
pub mod models;
pub mod open;
pub mod proxy;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(chat::handle_chat_completions))
        .route("/v1/models", get(models::list_models))
        .route("/health", get(models::health))
        .route("/open", get(open::open_file))
        .route("/proxy/es", post(proxy::proxy_es))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
