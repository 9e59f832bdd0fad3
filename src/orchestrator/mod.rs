//! Session lifecycle: authentication, the single-active-session-per-lab
//! rule, TTL bookkeeping, and dispatch to the grader. Mirrors the shape of
//! a session manager that owns a durable store plus an in-memory map of
//! per-key locks guarding a critical section, generalized here to key on
//! `(user_id, lab_slug)` instead of a single session id.

pub mod labs;
pub mod rate_limit;
pub mod ttl;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::grader::{self, Grader};
use crate::storage::{AttemptRow, SessionRow, Storage, UserRow};
use crate::supervisor::{Quotas, Supervisor};
use labs::LabRegistry;
use rate_limit::RateLimitTracker;

pub struct Orchestrator {
    pub storage: Arc<Storage>,
    pub supervisor: Arc<dyn Supervisor>,
    pub labs: LabRegistry,
    pub config: Arc<AppConfig>,
    pub rate_limiter: RateLimitTracker,
    /// Serializes `start_session` per (user_id, lab_slug) so two concurrent
    /// calls for the same pair never both see themselves as the winner.
    start_locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: String,
    pub lab_slug: String,
    pub created_at: chrono::DateTime<Utc>,
    pub expires_at: chrono::DateTime<Utc>,
    pub ended_at: Option<chrono::DateTime<Utc>>,
    pub active: bool,
}

impl From<SessionRow> for SessionView {
    fn from(row: SessionRow) -> Self {
        let active = row.is_active(Utc::now());
        Self {
            id: row.id,
            lab_slug: row.lab_slug,
            created_at: row.created_at,
            expires_at: row.expires_at,
            ended_at: row.ended_at,
            active,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StartSessionResult {
    pub session: SessionView,
    pub replaced: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InspectorView {
    pub latest: Option<serde_json::Value>,
    pub previous: Option<serde_json::Value>,
    /// Dotted-path -> (previous, latest) for every numeric leaf present in
    /// both metric trees. Computed here, not by individual graders, so a
    /// grader only ever reports one attempt's numbers.
    pub deltas: serde_json::Map<String, serde_json::Value>,
    pub timeline: Vec<AttemptSummary>,
}

/// Walks two metric trees in lockstep and records the numeric delta at every
/// dotted path where both sides hold a number. Non-numeric or one-sided
/// leaves are skipped rather than guessed at.
fn numeric_deltas(latest: &serde_json::Value, previous: &serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    fn walk(
        prefix: &str,
        latest: &serde_json::Value,
        previous: &serde_json::Value,
        out: &mut serde_json::Map<String, serde_json::Value>,
    ) {
        match (latest, previous) {
            (serde_json::Value::Object(l), serde_json::Value::Object(p)) => {
                for (key, lval) in l {
                    let Some(pval) = p.get(key) else { continue };
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    walk(&path, lval, pval, out);
                }
            }
            (serde_json::Value::Number(l), serde_json::Value::Number(p)) => {
                if let (Some(l), Some(p)) = (l.as_f64(), p.as_f64()) {
                    out.insert(prefix.to_string(), serde_json::json!(l - p));
                }
            }
            _ => {}
        }
    }

    let mut out = serde_json::Map::new();
    walk("", latest, previous, &mut out);
    out
}

#[derive(Debug, Serialize)]
pub struct AttemptSummary {
    pub id: i64,
    pub created_at: chrono::DateTime<Utc>,
    pub passed: bool,
}

impl Orchestrator {
    pub fn new(storage: Arc<Storage>, supervisor: Arc<dyn Supervisor>, config: Arc<AppConfig>) -> Self {
        Self {
            storage,
            supervisor,
            labs: LabRegistry::default(),
            config,
            rate_limiter: RateLimitTracker::default(),
            start_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn authenticate(
        &self,
        provider: &str,
        provider_account_id: &str,
        email: Option<&str>,
        name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> AppResult<(UserRow, String)> {
        let now = Utc::now();
        let user_id = Uuid::new_v4().to_string();
        let user = self
            .storage
            .upsert_user(&user_id, provider, provider_account_id, email, name, avatar_url, now)
            .await?;
        let token = auth::generate_token(&self.config.token_secret);
        self.storage.insert_token(&auth::hash_token(&token), &user.id, now).await?;
        Ok((user, token))
    }

    pub async fn resolve_caller(&self, bearer_header: Option<&str>) -> AppResult<UserRow> {
        let header = bearer_header.ok_or(AppError::Unauthenticated)?;
        let token = auth::parse_bearer(header).ok_or(AppError::Unauthenticated)?;
        let hash = auth::hash_token(token);
        let user_id = self
            .storage
            .resolve_token(&hash)
            .await?
            .ok_or(AppError::Unauthenticated)?;
        self.storage
            .get_user(&user_id)
            .await?
            .ok_or(AppError::Unauthenticated)
    }

    pub async fn logout(&self, bearer_header: &str) -> AppResult<()> {
        if let Some(token) = auth::parse_bearer(bearer_header) {
            self.storage.revoke_token(&auth::hash_token(token), Utc::now()).await?;
        }
        Ok(())
    }

    async fn lock_for(&self, user_id: &str, lab_slug: &str) -> Arc<Mutex<()>> {
        let mut locks = self.start_locks.lock().await;
        locks
            .entry((user_id.to_string(), lab_slug.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn start_session(&self, user: &UserRow, lab_slug: &str) -> AppResult<StartSessionResult> {
        let lab = self.labs.get(lab_slug)?.clone();
        let key_lock = self.lock_for(&user.id, lab_slug).await;
        let _guard = key_lock.lock().await;

        let active = self.storage.active_sessions_for(&user.id, lab_slug).await?;
        let mut replaced = Vec::with_capacity(active.len());
        let now = Utc::now();
        for session in &active {
            let _ = self.supervisor.stop(&session.id).await;
            self.storage.end_session_if_active(&session.id, now).await?;
            self.rate_limiter.forget(&session.id);
            replaced.push(session.id.clone());
        }

        let live = self.storage.count_active_sessions().await?;
        if live >= self.config.max_concurrent_workers as i64 {
            return Err(AppError::CapacityExhausted);
        }

        let session_id = Uuid::new_v4().to_string();
        let quotas = Quotas {
            memory: self.config.runner_memory.clone(),
            cpu_quota: self.config.runner_cpu_quota,
            pid_limit: self.config.runner_pid_limit,
        };
        let handle = self
            .supervisor
            .start(&session_id, self.config.session_ttl_seconds, &quotas, Some(&lab.starter_path))
            .await
            .map_err(|_| AppError::SupervisorUnavailable("worker creation failed".to_string()))?;

        let expires_at = now + ChronoDuration::seconds(self.config.session_ttl_seconds as i64);
        let row = SessionRow {
            id: session_id,
            user_id: user.id.clone(),
            lab_slug: lab_slug.to_string(),
            worker_ref: handle.worker_ref,
            ttl_seconds: self.config.session_ttl_seconds as i64,
            created_at: now,
            expires_at,
            ended_at: None,
        };
        self.storage.insert_session(&row).await?;

        Ok(StartSessionResult {
            session: row.into(),
            replaced,
        })
    }

    pub async fn get_active_session(&self, user: &UserRow, lab_slug: &str) -> AppResult<SessionView> {
        let active = self.storage.active_sessions_for(&user.id, lab_slug).await?;
        active
            .into_iter()
            .next()
            .map(Into::into)
            .ok_or(AppError::NoActiveSession)
    }

    async fn load_owned_session(&self, user: &UserRow, session_id: &str) -> AppResult<SessionRow> {
        let session = self
            .storage
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        if session.user_id != user.id {
            return Err(AppError::Forbidden);
        }
        Ok(session)
    }

    pub async fn get_session(&self, user: &UserRow, session_id: &str, limit: i64) -> AppResult<(SessionView, Vec<AttemptRow>)> {
        let session = self.load_owned_session(user, session_id).await?;
        let attempts = self.storage.recent_attempts(session_id, limit).await?;
        Ok((session.into(), attempts))
    }

    /// Any operation other than `stop_session` fails once a session's
    /// `expires_at` has passed, even if the sweeper hasn't run yet.
    fn require_live(session: &SessionRow) -> AppResult<()> {
        if !session.is_active(Utc::now()) {
            return Err(AppError::SessionExpired);
        }
        Ok(())
    }

    pub async fn stop_session(&self, user: &UserRow, session_id: &str) -> AppResult<SessionView> {
        let session = self.load_owned_session(user, session_id).await?;
        let _ = self.supervisor.stop(session_id).await;
        let now = Utc::now();
        self.storage.end_session_if_active(session_id, now).await?;
        self.rate_limiter.forget(session_id);
        let refreshed = self
            .storage
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        Ok(refreshed.into())
    }

    pub async fn submit(&self, user: &UserRow, lab_slug: &str, session_id: &str) -> AppResult<AttemptRow> {
        let session = self.load_owned_session(user, session_id).await?;
        Self::require_live(&session)?;
        if session.lab_slug != lab_slug {
            return Err(AppError::LabNotFound(lab_slug.to_string()));
        }

        let scoped = grader::SessionScopedSupervisor::new(self.supervisor.clone(), session_id.to_string());
        let outcome = grader::registry()
            .get(lab_slug)?
            .evaluate(session_id, &scoped)
            .await;

        let now = Utc::now();
        let failures = serde_json::to_value(&outcome.failures).unwrap_or_default();
        let metrics = serde_json::to_value(&outcome.metrics).unwrap_or_default();
        let notes = serde_json::to_value(&outcome.notes).unwrap_or_default();
        self.storage
            .insert_attempt(session_id, lab_slug, now, outcome.passed, &failures, &metrics, &notes)
            .await
    }

    pub async fn inspector(&self, user: &UserRow, session_id: &str) -> AppResult<InspectorView> {
        let _session = self.load_owned_session(user, session_id).await?;
        let attempts = self.storage.recent_attempts(session_id, 20).await?;
        let latest = attempts.first().map(|a| a.metrics.clone());
        let previous = attempts.get(1).map(|a| a.metrics.clone());
        let deltas = match (&latest, &previous) {
            (Some(l), Some(p)) => numeric_deltas(l, p),
            _ => serde_json::Map::new(),
        };
        let timeline = attempts
            .iter()
            .map(|a| AttemptSummary {
                id: a.id,
                created_at: a.created_at,
                passed: a.passed,
            })
            .collect();
        Ok(InspectorView {
            latest,
            previous,
            deltas,
            timeline,
        })
    }

    pub async fn check_rate_limit(&self, session_id: &str) -> AppResult<()> {
        let limit = self.config.hot.read().await.agent_rate_limit_per_min;
        self.rate_limiter
            .check(session_id, limit, Utc::now())
            .map_err(|retry_after_secs| AppError::RateLimited { retry_after_secs })
    }

    pub async fn owned_live_session(&self, user: &UserRow, session_id: &str) -> AppResult<SessionRow> {
        let session = self.load_owned_session(user, session_id).await?;
        Self::require_live(&session)?;
        Ok(session)
    }
}
