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
pub struct OAuthExchangeRequest {
    pub provider_account_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

pub async fn oauth_exchange(
    State(ctx): State<Arc<AppContext>>,
    Path(provider): Path<String>,
    Json(body): Json<OAuthExchangeRequest>,
) -> AppResult<impl IntoResponse> {
    let (user, token) = ctx
        .orchestrator
        .authenticate(
            &provider,
            &body.provider_account_id,
            body.email.as_deref(),
            body.name.as_deref(),
            body.avatar_url.as_deref(),
        )
        .await?;
    Ok(Json(json!({
        "user_id": user.id,
        "token": token,
        "created_at": user.created_at,
        "last_login_at": user.last_login_at,
    })))
}

pub async fn logout(State(ctx): State<Arc<AppContext>>, headers: HeaderMap) -> AppResult<impl IntoResponse> {
    let header = bearer_header(&headers).ok_or(AppError::Unauthenticated)?;
    ctx.orchestrator.logout(header).await?;
    Ok(Json(json!({})))
}

pub async fn me(State(ctx): State<Arc<AppContext>>, headers: HeaderMap) -> AppResult<impl IntoResponse> {
    let user = ctx.orchestrator.resolve_caller(bearer_header(&headers)).await?;
    Ok(Json(json!({
        "id": user.id,
        "provider": user.provider,
        "email": user.email,
        "name": user.name,
        "avatar_url": user.avatar_url,
        "last_login_at": user.last_login_at,
    })))
}
