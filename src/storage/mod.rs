//! Single-writer SQLite store for users, auth tokens, sessions, and
//! attempts. Migrations are forward-only and applied at startup; later
//! schema changes land as additional `ALTER TABLE` statements that swallow
//! "duplicate column" errors so re-running a migration is a no-op.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

const MIGRATION_001: &str = include_str!("migrations/001_init.sql");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: String,
    pub provider: String,
    pub provider_account_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub lab_slug: String,
    pub worker_ref: String,
    pub ttl_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.ended_at.is_none() && now < self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRow {
    pub id: i64,
    pub session_id: String,
    pub lab_slug: String,
    pub created_at: DateTime<Utc>,
    pub passed: bool,
    pub failures: serde_json::Value,
    pub metrics: serde_json::Value,
    pub notes: serde_json::Value,
}

pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn connect(path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("creating store directory")?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .context("connecting to sqlite store")?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in MIGRATION_001.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn with_timeout<T>(&self, fut: impl std::future::Future<Output = sqlx::Result<T>>) -> Result<T> {
        tokio::time::timeout(QUERY_TIMEOUT, fut)
            .await
            .context("query timed out")?
            .context("query failed")
    }

    // --- users ---------------------------------------------------------

    pub async fn upsert_user(
        &self,
        id: &str,
        provider: &str,
        provider_account_id: &str,
        email: Option<&str>,
        name: Option<&str>,
        avatar_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<UserRow> {
        self.with_timeout(
            sqlx::query(
                "INSERT INTO users (id, provider, provider_account_id, email, name, avatar_url, created_at, last_login_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(provider, provider_account_id) DO UPDATE SET
                    email = excluded.email, name = excluded.name, avatar_url = excluded.avatar_url,
                    last_login_at = excluded.last_login_at",
            )
            .bind(id)
            .bind(provider)
            .bind(provider_account_id)
            .bind(email)
            .bind(name)
            .bind(avatar_url)
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(&self.pool),
        )
        .await?;
        self.get_user_by_provider(provider, provider_account_id)
            .await?
            .context("user upsert did not round-trip")
    }

    pub async fn get_user_by_provider(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<UserRow>> {
        let row = self
            .with_timeout(
                sqlx::query_as::<_, UserRowRaw>(
                    "SELECT id, provider, provider_account_id, email, name, avatar_url, created_at, last_login_at
                     FROM users WHERE provider = ? AND provider_account_id = ?",
                )
                .bind(provider)
                .bind(provider_account_id)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(Into::into))
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        let row = self
            .with_timeout(
                sqlx::query_as::<_, UserRowRaw>(
                    "SELECT id, provider, provider_account_id, email, name, avatar_url, created_at, last_login_at
                     FROM users WHERE id = ?",
                )
                .bind(id)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(Into::into))
    }

    // --- auth tokens -----------------------------------------------------

    pub async fn insert_token(&self, token_hash: &str, user_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_timeout(
            sqlx::query("INSERT INTO auth_tokens (token_hash, user_id, created_at) VALUES (?, ?, ?)")
                .bind(token_hash)
                .bind(user_id)
                .bind(now.to_rfc3339())
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn revoke_token(&self, token_hash: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_timeout(
            sqlx::query("UPDATE auth_tokens SET revoked_at = ? WHERE token_hash = ?")
                .bind(now.to_rfc3339())
                .bind(token_hash)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// `Some(user_id)` iff the token hash exists and is unrevoked.
    pub async fn resolve_token(&self, token_hash: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = self
            .with_timeout(
                sqlx::query_as(
                    "SELECT user_id FROM auth_tokens WHERE token_hash = ? AND revoked_at IS NULL",
                )
                .bind(token_hash)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(|(user_id,)| user_id))
    }

    // --- sessions --------------------------------------------------------

    pub async fn insert_session(&self, session: &SessionRow) -> Result<()> {
        self.with_timeout(
            sqlx::query(
                "INSERT INTO sessions (id, user_id, lab_slug, worker_ref, ttl_seconds, created_at, expires_at, ended_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&session.id)
            .bind(&session.user_id)
            .bind(&session.lab_slug)
            .bind(&session.worker_ref)
            .bind(session.ttl_seconds)
            .bind(session.created_at.to_rfc3339())
            .bind(session.expires_at.to_rfc3339())
            .bind(session.ended_at.map(|t| t.to_rfc3339()))
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn active_sessions_for(&self, user_id: &str, lab_slug: &str) -> Result<Vec<SessionRow>> {
        let rows = self
            .with_timeout(
                sqlx::query_as::<_, SessionRowRaw>(
                    "SELECT id, user_id, lab_slug, worker_ref, ttl_seconds, created_at, expires_at, ended_at
                     FROM sessions WHERE user_id = ? AND lab_slug = ? AND ended_at IS NULL",
                )
                .bind(user_id)
                .bind(lab_slug)
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Count of live (unended) sessions across all users and labs, used to
    /// enforce the global worker cap before a new one is started.
    pub async fn count_active_sessions(&self) -> Result<i64> {
        let count: (i64,) = self
            .with_timeout(
                sqlx::query_as("SELECT COUNT(*) FROM sessions WHERE ended_at IS NULL").fetch_one(&self.pool),
            )
            .await?;
        Ok(count.0)
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRow>> {
        let row = self
            .with_timeout(
                sqlx::query_as::<_, SessionRowRaw>(
                    "SELECT id, user_id, lab_slug, worker_ref, ttl_seconds, created_at, expires_at, ended_at
                     FROM sessions WHERE id = ?",
                )
                .bind(id)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(Into::into))
    }

    /// Ends a session, but only if it isn't already ended — the second of
    /// two concurrent `stop_session` calls is a no-op that still reports
    /// the original `ended_at`.
    pub async fn end_session_if_active(&self, id: &str, ended_at: DateTime<Utc>) -> Result<()> {
        self.with_timeout(
            sqlx::query("UPDATE sessions SET ended_at = ? WHERE id = ? AND ended_at IS NULL")
                .bind(ended_at.to_rfc3339())
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn sweepable_sessions(&self, now: DateTime<Utc>) -> Result<Vec<SessionRow>> {
        let rows = self
            .with_timeout(
                sqlx::query_as::<_, SessionRowRaw>(
                    "SELECT id, user_id, lab_slug, worker_ref, ttl_seconds, created_at, expires_at, ended_at
                     FROM sessions WHERE ended_at IS NULL AND expires_at <= ?",
                )
                .bind(now.to_rfc3339())
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// At startup, any session left without `ended_at` whose worker is
    /// unknown to this process (the prior process died) is conservatively
    /// marked expired so stale rows don't masquerade as active forever.
    pub async fn recover_stale_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = self
            .with_timeout(
                sqlx::query(
                    "UPDATE sessions SET ended_at = expires_at WHERE ended_at IS NULL AND expires_at <= ?",
                )
                .bind(now.to_rfc3339())
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    // --- attempts --------------------------------------------------------

    pub async fn insert_attempt(
        &self,
        session_id: &str,
        lab_slug: &str,
        created_at: DateTime<Utc>,
        passed: bool,
        failures: &serde_json::Value,
        metrics: &serde_json::Value,
        notes: &serde_json::Value,
    ) -> Result<AttemptRow> {
        let id: (i64,) = self
            .with_timeout(
                sqlx::query_as(
                    "INSERT INTO attempts (session_id, lab_slug, created_at, passed, failures, metrics, notes)
                     VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
                )
                .bind(session_id)
                .bind(lab_slug)
                .bind(created_at.to_rfc3339())
                .bind(passed)
                .bind(failures.to_string())
                .bind(metrics.to_string())
                .bind(notes.to_string())
                .fetch_one(&self.pool),
            )
            .await?;
        Ok(AttemptRow {
            id: id.0,
            session_id: session_id.to_string(),
            lab_slug: lab_slug.to_string(),
            created_at,
            passed,
            failures: failures.clone(),
            metrics: metrics.clone(),
            notes: notes.clone(),
        })
    }

    pub async fn recent_attempts(&self, session_id: &str, limit: i64) -> Result<Vec<AttemptRow>> {
        let rows = self
            .with_timeout(
                sqlx::query_as::<_, AttemptRowRaw>(
                    "SELECT id, session_id, lab_slug, created_at, passed, failures, metrics, notes
                     FROM attempts WHERE session_id = ? ORDER BY id DESC LIMIT ?",
                )
                .bind(session_id)
                .bind(limit)
                .fetch_all(&self.pool),
            )
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

// --- raw row shapes + conversions ---------------------------------------

#[derive(sqlx::FromRow)]
struct UserRowRaw {
    id: String,
    provider: String,
    provider_account_id: String,
    email: Option<String>,
    name: Option<String>,
    avatar_url: Option<String>,
    created_at: String,
    last_login_at: String,
}

impl From<UserRowRaw> for UserRow {
    fn from(r: UserRowRaw) -> Self {
        Self {
            id: r.id,
            provider: r.provider,
            provider_account_id: r.provider_account_id,
            email: r.email,
            name: r.name,
            avatar_url: r.avatar_url,
            created_at: parse_rfc3339(&r.created_at),
            last_login_at: parse_rfc3339(&r.last_login_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRowRaw {
    id: String,
    user_id: String,
    lab_slug: String,
    worker_ref: String,
    ttl_seconds: i64,
    created_at: String,
    expires_at: String,
    ended_at: Option<String>,
}

impl From<SessionRowRaw> for SessionRow {
    fn from(r: SessionRowRaw) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            lab_slug: r.lab_slug,
            worker_ref: r.worker_ref,
            ttl_seconds: r.ttl_seconds,
            created_at: parse_rfc3339(&r.created_at),
            expires_at: parse_rfc3339(&r.expires_at),
            ended_at: r.ended_at.as_deref().map(parse_rfc3339),
        }
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRowRaw {
    id: i64,
    session_id: String,
    lab_slug: String,
    created_at: String,
    passed: bool,
    failures: String,
    metrics: String,
    notes: String,
}

impl TryFrom<AttemptRowRaw> for AttemptRow {
    type Error = anyhow::Error;

    fn try_from(r: AttemptRowRaw) -> Result<Self> {
        Ok(Self {
            id: r.id,
            session_id: r.session_id,
            lab_slug: r.lab_slug,
            created_at: parse_rfc3339(&r.created_at),
            passed: r.passed,
            failures: serde_json::from_str(&r.failures)?,
            metrics: serde_json::from_str(&r.metrics)?,
            notes: serde_json::from_str(&r.notes)?,
        })
    }
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
