//! Workspace path resolution shared by `engine::DockerSupervisor`'s
//! filesystem operations. The supervisor never touches the worker's
//! filesystem from the host directly — every operation is exec'd inside
//! the worker container — but the path it hands to that exec must still be
//! validated the same way the orchestrator's own `/fs` routes are.

use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::security::safe_path;

/// Fixed root inside every worker container; matches `WORKSPACE_ROOT` in
/// `engine.rs`.
pub const WORKSPACE_ROOT: &str = "/workspace";

/// Resolve a client-relative path against the worker's workspace root,
/// returning the absolute in-container path as it should be passed to a
/// shell command run via `exec`.
pub fn resolve(relative: &str) -> Result<PathBuf, AppError> {
    safe_path(Path::new(WORKSPACE_ROOT), relative)
}
