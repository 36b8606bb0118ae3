//! `X-Tenant-ID` extraction (§4.12, §6): the header-based half of tenant
//! resolution precedence, layered in front of the process-wide active
//! tenant inside `TenantManager::resolve`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;

pub struct TenantHeader(pub Option<String>);

impl<S> FromRequestParts<S> for TenantHeader
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get("X-Tenant-ID")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        Ok(TenantHeader(value))
    }
}
