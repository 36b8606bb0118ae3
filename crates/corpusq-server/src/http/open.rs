//! `GET /open?path=...` (§6, §11.3): serves a file back to the client that
//! clicked a citation's `local_url`. The only access control is
//! containment within the resolved tenant's `document_root` — this
//! endpoint exists so citation links never leak a raw `file://` URL, not
//! as a general-purpose file server.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::path::Path;

use crate::error::AppError;
use crate::http::headers::TenantHeader;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct OpenQuery {
    pub path: String,
}

pub async fn open_file(
    State(state): State<AppState>,
    TenantHeader(tenant_header): TenantHeader,
    Query(query): Query<OpenQuery>,
) -> Result<Response, AppError> {
    let tenant = state.tenants.resolve(tenant_header.as_deref());

    let requested = Path::new(&query.path);
    let root = tenant.document_root.canonicalize().map_err(|e| AppError::internal(e.to_string()))?;
    let canonical = requested
        .canonicalize()
        .map_err(|_| AppError::not_found("file does not exist"))?;

    if !canonical.starts_with(&root) {
        return Err(AppError::forbidden("path is outside the tenant's document root"));
    }

    let bytes = tokio::fs::read(&canonical).await.map_err(|e| AppError::internal(e.to_string()))?;
    let content_type = guess_content_type(&canonical);

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase().as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "json" => "application/json",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}
