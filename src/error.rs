//! Stable error taxonomy shared by the orchestrator and supervisor HTTP
//! surfaces. Every handler returns `Result<_, AppError>`; `AppError`
//! implements `IntoResponse` so a single `?` at the handler boundary is
//! enough to produce the documented status code and `{detail}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("lab not found: {0}")]
    LabNotFound(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("no active session")]
    NoActiveSession,
    #[error("session expired")]
    SessionExpired,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("path escapes workspace: {0}")]
    PathEscapesWorkspace(String),
    #[error("path contains a NUL byte")]
    PathContainsNul,
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("capacity exhausted")]
    CapacityExhausted,
    #[error("supervisor unavailable: {0}")]
    SupervisorUnavailable(String),
    #[error("worker missing")]
    WorkerMissing,
    #[error("engine error: {0}")]
    EngineError(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthenticated => "unauthenticated",
            AppError::Forbidden => "forbidden",
            AppError::LabNotFound(_) => "lab_not_found",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::NoActiveSession => "no_active_session",
            AppError::SessionExpired => "session_expired",
            AppError::InvalidPath(_) => "invalid_path",
            AppError::PathEscapesWorkspace(_) => "path_escapes_workspace",
            AppError::PathContainsNul => "path_contains_nul",
            AppError::NotADirectory(_) => "not_a_directory",
            AppError::IsADirectory(_) => "is_a_directory",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::CapacityExhausted => "capacity_exhausted",
            AppError::SupervisorUnavailable(_) => "supervisor_unavailable",
            AppError::WorkerMissing => "worker_missing",
            AppError::EngineError(_) => "engine_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::LabNotFound(_)
            | AppError::SessionNotFound(_)
            | AppError::NoActiveSession => StatusCode::NOT_FOUND,
            AppError::SessionExpired => StatusCode::CONFLICT,
            AppError::InvalidPath(_)
            | AppError::PathEscapesWorkspace(_)
            | AppError::PathContainsNul
            | AppError::NotADirectory(_)
            | AppError::IsADirectory(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::CapacityExhausted => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SupervisorUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::WorkerMissing => StatusCode::SERVICE_UNAVAILABLE,
            AppError::EngineError(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(self, AppError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let status = self.status();
        let mut body = json!({ "detail": self.to_string(), "code": self.code() });
        if let AppError::RateLimited { retry_after_secs } = &self {
            body["retry_after_secs"] = json!(retry_after_secs);
        }
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
