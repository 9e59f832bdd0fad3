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
pub struct LimitQuery {
    pub limit: Option<i64>,
}

pub async fn get_session(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Query(q): Query<LimitQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    let (session, attempts) = ctx
        .orchestrator
        .get_session(&user, &id, q.limit.unwrap_or(10))
        .await?;
    Ok(Json(json!({ "session": session, "attempts": attempts })))
}

pub async fn stop_session(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    let session = ctx.orchestrator.stop_session(&user, &id).await?;
    Ok(Json(session))
}

pub async fn inspector(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    let view = ctx.orchestrator.inspector(&user, &id).await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
pub struct BuildRequest {
    pub context_path: String,
    pub dockerfile_path: String,
}

pub async fn build(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<BuildRequest>,
) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    let session = ctx.orchestrator.owned_live_session(&user, &id).await?;
    let image_tag = format!("session-{}-build", session.id);
    let result = ctx
        .orchestrator
        .supervisor
        .build(&session.id, &body.context_path, &body.dockerfile_path, &image_tag)
        .await?;
    Ok(Json(result))
}
