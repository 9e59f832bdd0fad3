//! The supervisor owns the container engine socket. `Supervisor` is the
//! seam between "talk to real containers" (`engine::DockerSupervisor`) and
//! "talk to a remote supervisor process over HTTP" (`client::RemoteSupervisor`),
//! and is also what the grader is handed — scoped to one session at a time,
//! see `SessionScopedSupervisor` in `crate::grader`.

pub mod client;
pub mod engine;
pub mod fs;
pub mod server;
pub mod terminal;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quotas {
    pub memory: String,
    pub cpu_quota: f64,
    pub pid_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHandle {
    pub worker_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LayerInfo {
    pub id: String,
    pub created_by: String,
    pub size_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BuildResult {
    pub image_tag: String,
    pub logs: String,
    pub elapsed_seconds: f64,
    pub image_size_mb: f64,
    pub layer_count: u32,
    pub layers: Vec<LayerInfo>,
    pub cache_hits: u32,
    pub succeeded: bool,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunResult {
    pub container_ref: String,
    pub logs: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FsEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FsListing {
    pub entries: Vec<FsEntry>,
    pub exists: bool,
    pub is_dir: bool,
}

#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn start(
        &self,
        session_id: &str,
        ttl_seconds: u64,
        quotas: &Quotas,
        seed_src: Option<&str>,
    ) -> Result<WorkerHandle, AppError>;

    async fn stop(&self, session_id: &str) -> Result<(), AppError>;

    async fn build(
        &self,
        session_id: &str,
        context_path: &str,
        dockerfile_path: &str,
        image_tag: &str,
    ) -> Result<BuildResult, AppError>;

    async fn run(
        &self,
        session_id: &str,
        image: &str,
        ports: &[(u16, u16)],
        detached: bool,
        auto_remove: bool,
    ) -> Result<RunResult, AppError>;

    async fn stop_run(
        &self,
        session_id: &str,
        container_ref: &str,
        timeout_secs: u64,
        remove: bool,
    ) -> Result<(), AppError>;

    async fn exec(
        &self,
        session_id: &str,
        argv: &[String],
        workdir: Option<&str>,
        timeout_secs: Option<u64>,
    ) -> Result<ExecResult, AppError>;

    async fn fs_list(&self, session_id: &str, path: &str) -> Result<FsListing, AppError>;
    async fn fs_read(&self, session_id: &str, path: &str) -> Result<Vec<u8>, AppError>;
    async fn fs_write(&self, session_id: &str, path: &str, bytes: &[u8]) -> Result<(), AppError>;
    async fn fs_create(
        &self,
        session_id: &str,
        path: &str,
        is_dir: bool,
        bytes: Option<&[u8]>,
    ) -> Result<(), AppError>;
    async fn fs_rename(&self, session_id: &str, from: &str, to: &str) -> Result<(), AppError>;
    async fn fs_delete(&self, session_id: &str, path: &str) -> Result<(), AppError>;
}
