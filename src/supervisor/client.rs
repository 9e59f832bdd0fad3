//! HTTP client implementing `Supervisor` against a remote supervisor
//! process. Used by the orchestrator in the two-process production
//! topology; a single-process deployment can hold `engine::DockerSupervisor`
//! directly instead and skip the network hop entirely.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::{BuildResult, ExecResult, FsListing, Quotas, RunResult, Supervisor, WorkerHandle};
use crate::error::AppError;

/// Supervisor RPCs are retried at most twice (three attempts total) when the
/// failure looks transient: a transport-level error, or a 5xx that suggests
/// the supervisor process itself is restarting rather than rejecting the
/// call. Non-transient failures (4xx, 503 worker-missing) surface immediately.
const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(100);

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Jitter derived from elapsed wall-clock nanos rather than a `rand`
/// dependency — good enough to spread out retries from concurrent callers,
/// not meant to be unpredictable.
fn jittered_backoff(attempt: u32) -> Duration {
    let nanos = EPOCH.elapsed().subsec_nanos() as u64;
    let jitter_ms = nanos % 50;
    BASE_BACKOFF * attempt + Duration::from_millis(jitter_ms)
}

pub struct RemoteSupervisor {
    base_url: String,
    http: reqwest::Client,
}

impl RemoteSupervisor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<R, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .send_with_retry(|| self.http.post(&url).json(body).send())
            .await?;
        handle_response(resp).await
    }

    async fn get<R: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<R, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.send_with_retry(|| self.http.get(&url).send()).await?;
        handle_response(resp).await
    }

    async fn send_with_retry<F, Fut>(&self, make_request: F) -> Result<reqwest::Response, AppError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut attempt = 1;
        loop {
            match make_request().await {
                // 503 is the worker-missing signal, not a downstream hiccup — don't retry it.
                Ok(resp)
                    if resp.status().is_server_error()
                        && resp.status() != reqwest::StatusCode::SERVICE_UNAVAILABLE
                        && attempt < MAX_ATTEMPTS =>
                {
                    tokio::time::sleep(jittered_backoff(attempt)).await;
                    attempt += 1;
                }
                Ok(resp) => return Ok(resp),
                Err(err) if is_transient(&err) && attempt < MAX_ATTEMPTS => {
                    tokio::time::sleep(jittered_backoff(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(AppError::SupervisorUnavailable(err.to_string())),
            }
        }
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

async fn handle_response<R: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<R, AppError> {
    let status = resp.status();
    if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        return Err(AppError::WorkerMissing);
    }
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(AppError::EngineError(format!("{status}: {text}")));
    }
    resp.json::<R>()
        .await
        .map_err(|e| AppError::EngineError(e.to_string()))
}

#[derive(Serialize)]
struct StartBody<'a> {
    session_id: &'a str,
    ttl_seconds: u64,
    quotas: &'a Quotas,
    seed_src: Option<&'a str>,
}

#[derive(Serialize)]
struct BuildBody<'a> {
    session_id: &'a str,
    context_path: &'a str,
    dockerfile_path: &'a str,
    image_tag: &'a str,
}

#[derive(Serialize)]
struct RunBody<'a> {
    session_id: &'a str,
    image: &'a str,
    ports: &'a [(u16, u16)],
    detached: bool,
    auto_remove: bool,
}

#[derive(Serialize)]
struct ExecBody<'a> {
    session_id: &'a str,
    argv: &'a [String],
    workdir: Option<&'a str>,
    timeout_secs: Option<u64>,
}

#[derive(Serialize)]
struct FsWriteBody<'a> {
    session_id: &'a str,
    path: &'a str,
    bytes_b64: String,
}

#[derive(Deserialize)]
struct Ack {}

#[async_trait]
impl Supervisor for RemoteSupervisor {
    async fn start(
        &self,
        session_id: &str,
        ttl_seconds: u64,
        quotas: &Quotas,
        seed_src: Option<&str>,
    ) -> Result<WorkerHandle, AppError> {
        self.post(
            "/workers/start",
            &StartBody {
                session_id,
                ttl_seconds,
                quotas,
                seed_src,
            },
        )
        .await
    }

    async fn stop(&self, session_id: &str) -> Result<(), AppError> {
        let _: Ack = self.post("/workers/stop", &serde_json::json!({ "session_id": session_id })).await?;
        Ok(())
    }

    async fn build(
        &self,
        session_id: &str,
        context_path: &str,
        dockerfile_path: &str,
        image_tag: &str,
    ) -> Result<BuildResult, AppError> {
        self.post(
            "/build",
            &BuildBody {
                session_id,
                context_path,
                dockerfile_path,
                image_tag,
            },
        )
        .await
    }

    async fn run(
        &self,
        session_id: &str,
        image: &str,
        ports: &[(u16, u16)],
        detached: bool,
        auto_remove: bool,
    ) -> Result<RunResult, AppError> {
        self.post(
            "/run",
            &RunBody {
                session_id,
                image,
                ports,
                detached,
                auto_remove,
            },
        )
        .await
    }

    async fn stop_run(
        &self,
        session_id: &str,
        container_ref: &str,
        timeout_secs: u64,
        remove: bool,
    ) -> Result<(), AppError> {
        let _: Ack = self
            .post(
                "/run/stop",
                &serde_json::json!({
                    "session_id": session_id,
                    "container_ref": container_ref,
                    "timeout_secs": timeout_secs,
                    "remove": remove,
                }),
            )
            .await?;
        Ok(())
    }

    async fn exec(
        &self,
        session_id: &str,
        argv: &[String],
        workdir: Option<&str>,
        timeout_secs: Option<u64>,
    ) -> Result<ExecResult, AppError> {
        self.post(
            "/exec",
            &ExecBody {
                session_id,
                argv,
                workdir,
                timeout_secs,
            },
        )
        .await
    }

    async fn fs_list(&self, session_id: &str, path: &str) -> Result<FsListing, AppError> {
        self.get(&format!(
            "/fs/list?session_id={}&path={}",
            urlencode(session_id),
            urlencode(path)
        ))
        .await
    }

    async fn fs_read(&self, session_id: &str, path: &str) -> Result<Vec<u8>, AppError> {
        #[derive(Deserialize)]
        struct ReadResp {
            bytes_b64: String,
        }
        let resp: ReadResp = self
            .get(&format!(
                "/fs/read?session_id={}&path={}",
                urlencode(session_id),
                urlencode(path)
            ))
            .await?;
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &resp.bytes_b64)
            .map_err(|e| AppError::EngineError(e.to_string()))
    }

    async fn fs_write(&self, session_id: &str, path: &str, bytes: &[u8]) -> Result<(), AppError> {
        let _: Ack = self
            .post(
                "/fs/write",
                &FsWriteBody {
                    session_id,
                    path,
                    bytes_b64: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes),
                },
            )
            .await?;
        Ok(())
    }

    async fn fs_create(
        &self,
        session_id: &str,
        path: &str,
        is_dir: bool,
        bytes: Option<&[u8]>,
    ) -> Result<(), AppError> {
        let _: Ack = self
            .post(
                "/fs/create",
                &serde_json::json!({
                    "session_id": session_id,
                    "path": path,
                    "is_dir": is_dir,
                    "bytes_b64": bytes.map(|b| base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b)),
                }),
            )
            .await?;
        Ok(())
    }

    async fn fs_rename(&self, session_id: &str, from: &str, to: &str) -> Result<(), AppError> {
        let _: Ack = self
            .post("/fs/rename", &serde_json::json!({ "session_id": session_id, "from": from, "to": to }))
            .await?;
        Ok(())
    }

    async fn fs_delete(&self, session_id: &str, path: &str) -> Result<(), AppError> {
        let _: Ack = self
            .post("/fs/delete", &serde_json::json!({ "session_id": session_id, "path": path }))
            .await?;
        Ok(())
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
