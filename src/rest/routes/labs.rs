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
use crate::error::AppResult;
use crate::AppContext;

pub async fn list_labs(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    Json(ctx.orchestrator.labs.list())
}

pub async fn get_lab(State(ctx): State<Arc<AppContext>>, Path(slug): Path<String>) -> AppResult<impl IntoResponse> {
    let lab = ctx.orchestrator.labs.get(&slug)?;
    Ok(Json(lab.clone()))
}

pub async fn start_session(
    State(ctx): State<Arc<AppContext>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    let result = ctx.orchestrator.start_session(&user, &slug).await?;
    Ok(Json(result))
}

pub async fn get_active_session(
    State(ctx): State<Arc<AppContext>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    let session = ctx.orchestrator.get_active_session(&user, &slug).await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub session_id: String,
}

pub async fn check(
    State(ctx): State<Arc<AppContext>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CheckRequest>,
) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    let attempt = ctx.orchestrator.submit(&user, &slug, &body.session_id).await?;
    Ok(Json(json!({
        "id": attempt.id,
        "session_id": attempt.session_id,
        "created_at": attempt.created_at,
        "passed": attempt.passed,
        "failures": attempt.failures,
        "metrics": attempt.metrics,
        "notes": attempt.notes,
    })))
}
