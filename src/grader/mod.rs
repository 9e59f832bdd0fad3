//! Build → run → probe grading pipeline. Each lab is a `Grader`
//! implementation driven through `SessionScopedSupervisor`, a facade that
//! can only ever address the one session it was constructed for — a grader
//! has no way to reach another learner's worker even though the concrete
//! `Supervisor` underneath it can.

mod dockerfile;
mod first_image;
mod layer_cache;
mod multi_stage;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::error::AppError;
use crate::supervisor::{BuildResult, ExecResult, FsListing, RunResult, Supervisor};

#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub code: String,
    pub message: String,
    pub hint: Option<String>,
}

impl Failure {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

#[derive(Debug, Default, Serialize)]
pub struct AttemptOutcome {
    pub passed: bool,
    pub failures: Vec<Failure>,
    pub metrics: serde_json::Value,
    pub notes: serde_json::Value,
}

impl AttemptOutcome {
    pub fn finish(failures: Vec<Failure>, metrics: serde_json::Value, notes: serde_json::Value) -> Self {
        Self {
            passed: failures.is_empty(),
            failures,
            metrics,
            notes,
        }
    }
}

/// A `Supervisor` view pinned to one session id, handed to graders so they
/// exercise the exact same call surface a normal user action would, scoped
/// so they cannot address any other session's worker.
pub struct SessionScopedSupervisor {
    inner: Arc<dyn Supervisor>,
    session_id: String,
}

impl SessionScopedSupervisor {
    pub fn new(inner: Arc<dyn Supervisor>, session_id: String) -> Self {
        Self { inner, session_id }
    }

    pub async fn build(&self, context_path: &str, dockerfile_path: &str, image_tag: &str) -> Result<BuildResult, AppError> {
        self.inner.build(&self.session_id, context_path, dockerfile_path, image_tag).await
    }

    pub async fn run(&self, image: &str, ports: &[(u16, u16)], detached: bool, auto_remove: bool) -> Result<RunResult, AppError> {
        self.inner.run(&self.session_id, image, ports, detached, auto_remove).await
    }

    pub async fn stop_run(&self, container_ref: &str, timeout_secs: u64, remove: bool) -> Result<(), AppError> {
        self.inner.stop_run(&self.session_id, container_ref, timeout_secs, remove).await
    }

    pub async fn exec(&self, argv: &[String], workdir: Option<&str>, timeout_secs: Option<u64>) -> Result<ExecResult, AppError> {
        self.inner.exec(&self.session_id, argv, workdir, timeout_secs).await
    }

    pub async fn fs_list(&self, path: &str) -> Result<FsListing, AppError> {
        self.inner.fs_list(&self.session_id, path).await
    }

    pub async fn fs_read(&self, path: &str) -> Result<Vec<u8>, AppError> {
        self.inner.fs_read(&self.session_id, path).await
    }
}

#[async_trait]
pub trait Grader: Send + Sync {
    async fn evaluate(&self, session_id: &str, supervisor: &SessionScopedSupervisor) -> AttemptOutcome;
}

pub struct GraderRegistry {
    graders: HashMap<&'static str, Box<dyn Grader>>,
}

impl GraderRegistry {
    pub fn get(&self, slug: &str) -> Result<&dyn Grader, AppError> {
        self.graders
            .get(slug)
            .map(|b| b.as_ref())
            .ok_or_else(|| AppError::LabNotFound(slug.to_string()))
    }
}

// SAFETY-free note: Box<dyn Grader> is Send+Sync because every impl below
// holds no interior mutability; `Lazy` only needs the map built once.
static REGISTRY: Lazy<GraderRegistry> = Lazy::new(|| {
    let mut graders: HashMap<&'static str, Box<dyn Grader>> = HashMap::new();
    graders.insert("first-image", Box::new(first_image::FirstImageGrader));
    graders.insert("layer-cache", Box::new(layer_cache::LayerCacheGrader));
    graders.insert("multi-stage", Box::new(multi_stage::MultiStageGrader));
    GraderRegistry { graders }
});

pub fn registry() -> &'static GraderRegistry {
    &REGISTRY
}

/// Retries a health probe against a detached container's exposed port,
/// matching the generic pipeline's step 4. `probe` returns `Ok(true)` once
/// the container responds as expected.
pub async fn probe_with_backoff<F, Fut>(mut probe: F, attempts: u32) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let mut delay = std::time::Duration::from_millis(250);
    for attempt in 0..attempts {
        if probe().await {
            return true;
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
    false
}
