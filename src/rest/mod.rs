pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppContext;

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let cors = if ctx.config.cors_allow_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = ctx
            .config
            .cors_allow_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins).allow_methods(tower_http::cors::Any)
    };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/auth/oauth/:provider", post(routes::auth::oauth_exchange))
        .route("/auth/logout", post(routes::auth::logout))
        .route("/auth/me", get(routes::auth::me))
        .route("/labs", get(routes::labs::list_labs))
        .route("/labs/:slug", get(routes::labs::get_lab))
        .route("/labs/:slug/start", post(routes::labs::start_session))
        .route("/labs/:slug/session", get(routes::labs::get_active_session))
        .route("/labs/:slug/check", post(routes::labs::check))
        .route("/sessions/:id", get(routes::sessions::get_session))
        .route("/sessions/:id/stop", post(routes::sessions::stop_session))
        .route("/sessions/:id/inspector", get(routes::sessions::inspector))
        .route("/sessions/:id/build", post(routes::sessions::build))
        .route("/fs/:session/list", get(routes::fs::list))
        .route("/fs/:session/read", get(routes::fs::read))
        .route("/fs/write", post(routes::fs::write))
        .route("/fs/create", post(routes::fs::create))
        .route("/fs/rename", post(routes::fs::rename))
        .route("/fs/delete", post(routes::fs::delete))
        .route("/agent/:kind", post(routes::agent::invoke))
        .route("/agent/patch/apply", post(routes::agent::apply_patch))
        .route("/ws/terminal/:session", get(ws::ws_terminal))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn metrics(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    Json(json!({
        "uptime_seconds": ctx.started_at.elapsed().as_secs(),
    }))
}

pub async fn start_server(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let port = ctx.config.http_port;
    let router = build_router(ctx);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "orchestrator listening");
    axum::serve(listener, router).await?;
    Ok(())
}
