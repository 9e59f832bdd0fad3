//! The supervisor's own HTTP surface, reached only by the orchestrator
//! (loopback by convention). Mirrors `client::RemoteSupervisor`'s paths
//! exactly — the two modules are two sides of the same wire contract.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::engine::DockerSupervisor;
use super::terminal::proxy_terminal;
use super::{Quotas, Supervisor};
use crate::error::AppResult;

pub fn build_router(supervisor: Arc<DockerSupervisor>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/workers/start", post(start))
        .route("/workers/stop", post(stop))
        .route("/build", post(build))
        .route("/run", post(run))
        .route("/run/stop", post(stop_run))
        .route("/exec", post(exec))
        .route("/fs/list", get(fs_list))
        .route("/fs/read", get(fs_read))
        .route("/fs/write", post(fs_write))
        .route("/fs/create", post(fs_create))
        .route("/fs/rename", post(fs_rename))
        .route("/fs/delete", post(fs_delete))
        .route("/ws/terminal/:session", get(ws_terminal))
        .with_state(supervisor)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct StartReq {
    session_id: String,
    ttl_seconds: u64,
    quotas: Quotas,
    seed_src: Option<String>,
}

async fn start(State(sup): State<Arc<DockerSupervisor>>, Json(req): Json<StartReq>) -> AppResult<impl IntoResponse> {
    let handle = sup
        .start(&req.session_id, req.ttl_seconds, &req.quotas, req.seed_src.as_deref())
        .await?;
    Ok(Json(handle))
}

#[derive(Deserialize)]
struct SessionIdReq {
    session_id: String,
}

async fn stop(State(sup): State<Arc<DockerSupervisor>>, Json(req): Json<SessionIdReq>) -> AppResult<impl IntoResponse> {
    sup.stop(&req.session_id).await?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct BuildReq {
    session_id: String,
    context_path: String,
    dockerfile_path: String,
    image_tag: String,
}

async fn build(State(sup): State<Arc<DockerSupervisor>>, Json(req): Json<BuildReq>) -> AppResult<impl IntoResponse> {
    let result = sup
        .build(&req.session_id, &req.context_path, &req.dockerfile_path, &req.image_tag)
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct RunReq {
    session_id: String,
    image: String,
    ports: Vec<(u16, u16)>,
    detached: bool,
    auto_remove: bool,
}

async fn run(State(sup): State<Arc<DockerSupervisor>>, Json(req): Json<RunReq>) -> AppResult<impl IntoResponse> {
    let result = sup
        .run(&req.session_id, &req.image, &req.ports, req.detached, req.auto_remove)
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct StopRunReq {
    session_id: String,
    container_ref: String,
    timeout_secs: u64,
    remove: bool,
}

async fn stop_run(State(sup): State<Arc<DockerSupervisor>>, Json(req): Json<StopRunReq>) -> AppResult<impl IntoResponse> {
    sup.stop_run(&req.session_id, &req.container_ref, req.timeout_secs, req.remove)
        .await?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct ExecReq {
    session_id: String,
    argv: Vec<String>,
    workdir: Option<String>,
    timeout_secs: Option<u64>,
}

async fn exec(State(sup): State<Arc<DockerSupervisor>>, Json(req): Json<ExecReq>) -> AppResult<impl IntoResponse> {
    let result = sup
        .exec(&req.session_id, &req.argv, req.workdir.as_deref(), req.timeout_secs)
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct FsPathQuery {
    session_id: String,
    path: String,
}

async fn fs_list(State(sup): State<Arc<DockerSupervisor>>, Query(q): Query<FsPathQuery>) -> AppResult<impl IntoResponse> {
    Ok(Json(sup.fs_list(&q.session_id, &q.path).await?))
}

async fn fs_read(State(sup): State<Arc<DockerSupervisor>>, Query(q): Query<FsPathQuery>) -> AppResult<impl IntoResponse> {
    let bytes = sup.fs_read(&q.session_id, &q.path).await?;
    Ok(Json(json!({
        "bytes_b64": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
    })))
}

#[derive(Deserialize)]
struct FsWriteReq {
    session_id: String,
    path: String,
    bytes_b64: String,
}

async fn fs_write(State(sup): State<Arc<DockerSupervisor>>, Json(req): Json<FsWriteReq>) -> AppResult<impl IntoResponse> {
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &req.bytes_b64)
        .map_err(|e| crate::error::AppError::EngineError(e.to_string()))?;
    sup.fs_write(&req.session_id, &req.path, &bytes).await?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct FsCreateReq {
    session_id: String,
    path: String,
    is_dir: bool,
    bytes_b64: Option<String>,
}

async fn fs_create(State(sup): State<Arc<DockerSupervisor>>, Json(req): Json<FsCreateReq>) -> AppResult<impl IntoResponse> {
    let bytes = req
        .bytes_b64
        .map(|b| base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &b))
        .transpose()
        .map_err(|e| crate::error::AppError::EngineError(e.to_string()))?;
    sup.fs_create(&req.session_id, &req.path, req.is_dir, bytes.as_deref()).await?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct FsRenameReq {
    session_id: String,
    from: String,
    to: String,
}

async fn fs_rename(State(sup): State<Arc<DockerSupervisor>>, Json(req): Json<FsRenameReq>) -> AppResult<impl IntoResponse> {
    sup.fs_rename(&req.session_id, &req.from, &req.to).await?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct FsDeleteReq {
    session_id: String,
    path: String,
}

async fn fs_delete(State(sup): State<Arc<DockerSupervisor>>, Json(req): Json<FsDeleteReq>) -> AppResult<impl IntoResponse> {
    sup.fs_delete(&req.session_id, &req.path).await?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct TerminalQuery {
    shell: Option<String>,
}

async fn ws_terminal(
    State(sup): State<Arc<DockerSupervisor>>,
    axum::extract::Path(session_id): axum::extract::Path<String>,
    Query(q): Query<TerminalQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        match sup.terminal_target(&session_id).await {
            Ok((docker, container_id)) => {
                proxy_terminal(Arc::new(docker), container_id, q.shell, socket).await;
            }
            Err(err) => {
                tracing::warn!(?err, session_id, "terminal requested for unknown worker");
            }
        }
    })
}
