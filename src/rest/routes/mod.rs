pub mod agent;
pub mod auth;
pub mod fs;
pub mod labs;
pub mod sessions;

use axum::http::HeaderMap;

/// Pulls the raw `Authorization` header value out so handlers can pass it
/// straight to `Orchestrator::resolve_caller`/`logout`.
pub fn bearer_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()
}
