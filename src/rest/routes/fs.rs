use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::bearer_header;
use crate::error::AppResult;
use crate::AppContext;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    Path(session): Path<String>,
    Query(q): Query<PathQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    let session_row = ctx.orchestrator.owned_live_session(&user, &session).await?;
    let listing = ctx.orchestrator.supervisor.fs_list(&session_row.id, &q.path).await?;
    Ok(Json(listing))
}

pub async fn read(
    State(ctx): State<Arc<AppContext>>,
    Path(session): Path<String>,
    Query(q): Query<PathQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    let session_row = ctx.orchestrator.owned_live_session(&user, &session).await?;
    let bytes = ctx.orchestrator.supervisor.fs_read(&session_row.id, &q.path).await?;
    Ok(Json(json!({
        "bytes_b64": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
    })))
}

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub session_id: String,
    pub path: String,
    pub content_b64: String,
}

pub async fn write(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<WriteRequest>,
) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    let session_row = ctx.orchestrator.owned_live_session(&user, &body.session_id).await?;
    let bytes = decode_b64(&body.content_b64)?;
    ctx.orchestrator.supervisor.fs_write(&session_row.id, &body.path, &bytes).await?;
    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub session_id: String,
    pub path: String,
    pub kind: String,
    pub content_b64: Option<String>,
}

pub async fn create(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<CreateRequest>,
) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    let session_row = ctx.orchestrator.owned_live_session(&user, &body.session_id).await?;
    let bytes = body.content_b64.as_deref().map(decode_b64).transpose()?;
    ctx.orchestrator
        .supervisor
        .fs_create(&session_row.id, &body.path, body.kind == "directory", bytes.as_deref())
        .await?;
    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub session_id: String,
    pub path: String,
    pub new_path: String,
}

pub async fn rename(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<RenameRequest>,
) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    let session_row = ctx.orchestrator.owned_live_session(&user, &body.session_id).await?;
    ctx.orchestrator
        .supervisor
        .fs_rename(&session_row.id, &body.path, &body.new_path)
        .await?;
    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub session_id: String,
    pub path: String,
}

pub async fn delete(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<DeleteRequest>,
) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    let session_row = ctx.orchestrator.owned_live_session(&user, &body.session_id).await?;
    ctx.orchestrator.supervisor.fs_delete(&session_row.id, &body.path).await?;
    Ok(Json(json!({})))
}

fn decode_b64(s: &str) -> AppResult<Vec<u8>> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s)
        .map_err(|e| crate::error::AppError::InvalidPath(e.to_string()))
}
