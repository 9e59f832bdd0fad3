//! Hint/explain/patch endpoints. The LLM backend itself is an external
//! collaborator out of this crate's scope; what lives here is the part
//! that is in scope regardless — auth, session ownership, and the
//! per-session rate limit guarding it.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::bearer_header;
use crate::error::{AppError, AppResult};
use crate::AppContext;

#[derive(Debug, Deserialize)]
pub struct AgentRequest {
    pub session_id: String,
    pub prompt: String,
    pub lab_slug: Option<String>,
}

pub async fn invoke(
    State(ctx): State<Arc<AppContext>>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AgentRequest>,
) -> AppResult<impl IntoResponse> {
    if !matches!(kind.as_str(), "hint" | "explain" | "patch") {
        return Err(AppError::LabNotFound(kind));
    }
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    ctx.orchestrator.owned_live_session(&user, &body.session_id).await?;
    ctx.orchestrator.check_rate_limit(&body.session_id).await?;

    tracing::info!(kind, session_id = %body.session_id, "agent request accepted, dispatch is out of scope");
    Ok(Json(json!({
        "kind": kind,
        "session_id": body.session_id,
        "detail": "accepted; response generation is handled by an external agent backend",
    })))
}

#[derive(Debug, Deserialize)]
pub struct ApplyPatchRequest {
    pub session_id: String,
    pub files: Vec<PatchFile>,
}

#[derive(Debug, Deserialize)]
pub struct PatchFile {
    pub path: String,
    pub content: String,
}

pub async fn apply_patch(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<ApplyPatchRequest>,
) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    let session = ctx.orchestrator.owned_live_session(&user, &body.session_id).await?;
    ctx.orchestrator.check_rate_limit(&body.session_id).await?;

    for file in &body.files {
        ctx.orchestrator
            .supervisor
            .fs_write(&session.id, &file.path, file.content.as_bytes())
            .await?;
    }
    Ok(Json(json!({ "applied": body.files.len() })))
}
