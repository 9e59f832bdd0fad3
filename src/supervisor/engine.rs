//! Container-backed `Supervisor`. Owns one `bollard::Docker` connection to
//! the host's engine socket, used only to create/stop/exec the privileged
//! per-session worker container. The worker runs its own nested engine
//! daemon; build/run operations are driven by exec'ing that nested `docker`
//! CLI inside the worker rather than dialing a second engine socket, so the
//! workspace files the learner edited are exactly what the nested engine
//! sees — no archive round-trip between host and worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{BuildResult, ExecResult, FsEntry, FsListing, LayerInfo, Quotas, RunResult, Supervisor, WorkerHandle};
use crate::error::AppError;
use crate::supervisor::fs::{resolve, WORKSPACE_ROOT};

fn container_name(session_id: &str) -> String {
    format!("labyard-worker-{session_id}")
}

struct WorkerEntry {
    container_id: String,
    deadline: DateTime<Utc>,
}

pub struct DockerSupervisor {
    docker: Docker,
    /// session_id -> container id + TTL deadline, so `stop`/`exec` don't
    /// need a name lookup and the sweeper doesn't need to ask the engine
    /// for per-container start times.
    workers: RwLock<HashMap<String, WorkerEntry>>,
}

impl DockerSupervisor {
    pub fn connect() -> Result<Arc<Self>, AppError> {
        let docker = Docker::connect_with_socket_defaults()
            .map_err(|e| AppError::SupervisorUnavailable(e.to_string()))?;
        Ok(Arc::new(Self {
            docker,
            workers: RwLock::new(HashMap::new()),
        }))
    }

    async fn container_id(&self, session_id: &str) -> Result<String, AppError> {
        self.workers
            .read()
            .await
            .get(session_id)
            .map(|w| w.container_id.clone())
            .ok_or(AppError::WorkerMissing)
    }

    /// Exposed for the terminal WebSocket route, which needs the raw
    /// `Docker` handle and container id to attach a PTY exec directly
    /// rather than going through the request/response `Supervisor` trait.
    pub async fn terminal_target(&self, session_id: &str) -> Result<(Docker, String), AppError> {
        let container_id = self.container_id(session_id).await?;
        Ok((self.docker.clone(), container_id))
    }

    /// Independent TTL enforcement, run from the supervisor process itself
    /// so an orchestrator that's wedged or restarting doesn't leave workers
    /// running past their deadline.
    pub fn spawn_sweeper(self: Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                let now = Utc::now();
                let expired: Vec<String> = self
                    .workers
                    .read()
                    .await
                    .iter()
                    .filter(|(_, w)| w.deadline <= now)
                    .map(|(session_id, _)| session_id.clone())
                    .collect();
                for session_id in expired {
                    tracing::info!(session_id = %session_id, "supervisor sweep: stopping expired worker");
                    if let Err(err) = self.stop(&session_id).await {
                        tracing::warn!(session_id = %session_id, ?err, "supervisor sweep stop failed");
                    }
                }
            }
        })
    }

    /// Runs `argv` inside the worker via exec, returning combined exit code
    /// and separately-collected stdout/stderr.
    async fn run_exec(&self, container_id: &str, argv: &[String], workdir: Option<&str>) -> Result<ExecResult, AppError> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(argv.iter().map(String::as_str).collect()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: workdir,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| AppError::EngineError(e.to_string()))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| AppError::EngineError(e.to_string()))?
        {
            use futures_util::StreamExt;
            while let Some(Ok(msg)) = output.next().await {
                match msg {
                    bollard::container::LogOutput::StdOut { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    bollard::container::LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| AppError::EngineError(e.to_string()))?;

        Ok(ExecResult {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl Supervisor for DockerSupervisor {
    async fn start(
        &self,
        session_id: &str,
        ttl_seconds: u64,
        quotas: &Quotas,
        seed_src: Option<&str>,
    ) -> Result<WorkerHandle, AppError> {
        let name = container_name(session_id);
        let host_config = HostConfig {
            privileged: Some(true),
            memory: parse_memory_bytes(&quotas.memory),
            nano_cpus: Some((quotas.cpu_quota * 1_000_000_000.0) as i64),
            pids_limit: Some(quotas.pid_limit as i64),
            binds: seed_src.map(|src| vec![format!("{src}:/seed:ro")]),
            ..Default::default()
        };
        let config = ContainerConfig {
            image: Some("labyard/worker-base:latest".to_string()),
            host_config: Some(host_config),
            tty: Some(true),
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| AppError::EngineError(e.to_string()))?;

        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| AppError::EngineError(e.to_string()))?;

        self.run_exec(&created.id, &["mkdir".into(), "-p".into(), WORKSPACE_ROOT.into()], None)
            .await?;
        if seed_src.is_some() {
            self.run_exec(
                &created.id,
                &["sh".into(), "-c".into(), format!("cp -r /seed/. {WORKSPACE_ROOT}/")],
                None,
            )
            .await?;
        }

        let deadline = Utc::now() + chrono::Duration::seconds(ttl_seconds as i64);
        self.workers.write().await.insert(
            session_id.to_string(),
            WorkerEntry { container_id: created.id.clone(), deadline },
        );
        Ok(WorkerHandle { worker_ref: created.id })
    }

    async fn stop(&self, session_id: &str) -> Result<(), AppError> {
        let Some(entry) = self.workers.write().await.remove(session_id) else {
            // Already gone: stop is idempotent.
            return Ok(());
        };
        let container_id = entry.container_id;
        let _ = self
            .docker
            .stop_container(&container_id, Some(StopContainerOptions { t: 5 }))
            .await;
        let _ = self
            .docker
            .remove_container(
                &container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await;
        Ok(())
    }

    async fn build(
        &self,
        session_id: &str,
        context_path: &str,
        dockerfile_path: &str,
        image_tag: &str,
    ) -> Result<BuildResult, AppError> {
        let container_id = self.container_id(session_id).await?;
        let context = resolve(context_path)?;
        let dockerfile = resolve(dockerfile_path)?;

        let started = Instant::now();
        let build_argv = vec![
            "docker".into(),
            "build".into(),
            "-t".into(),
            image_tag.into(),
            "-f".into(),
            dockerfile.display().to_string(),
            context.display().to_string(),
        ];
        let result = self.run_exec(&container_id, &build_argv, None).await?;
        let elapsed_seconds = started.elapsed().as_secs_f64();
        let logs = format!("{}{}", result.stdout, result.stderr);

        if result.exit_code != 0 {
            return Ok(BuildResult {
                image_tag: image_tag.to_string(),
                logs: logs.clone(),
                elapsed_seconds,
                succeeded: false,
                hint: last_nonempty_line(&result.stderr),
                ..Default::default()
            });
        }

        let cache_hits = logs.matches("CACHED").count() as u32;
        let history = self
            .run_exec(
                &container_id,
                &["docker".into(), "history".into(), "--no-trunc".into(), "--format".into(), "{{json .}}".into(), image_tag.into()],
                None,
            )
            .await?;
        let layers = parse_layer_history(&history.stdout);
        let layer_count = layers.len() as u32;
        let image_size_mb = layers.iter().map(|l| l.size_mb).sum();

        Ok(BuildResult {
            image_tag: image_tag.to_string(),
            logs,
            elapsed_seconds,
            image_size_mb,
            layer_count,
            layers,
            cache_hits,
            succeeded: true,
            hint: None,
        })
    }

    async fn run(
        &self,
        session_id: &str,
        image: &str,
        ports: &[(u16, u16)],
        detached: bool,
        auto_remove: bool,
    ) -> Result<RunResult, AppError> {
        let container_id = self.container_id(session_id).await?;
        let mut argv = vec!["docker".to_string(), "run".to_string()];
        if detached {
            argv.push("-d".into());
        }
        if auto_remove {
            argv.push("--rm".into());
        }
        for (host, container) in ports {
            argv.push("-p".into());
            argv.push(format!("{host}:{container}"));
        }
        argv.push(image.to_string());
        let result = self.run_exec(&container_id, &argv, None).await?;
        if result.exit_code != 0 {
            return Err(AppError::EngineError(result.stderr));
        }
        let container_ref = result.stdout.trim().to_string();
        Ok(RunResult {
            container_ref,
            logs: None,
        })
    }

    async fn stop_run(
        &self,
        session_id: &str,
        container_ref: &str,
        timeout_secs: u64,
        remove: bool,
    ) -> Result<(), AppError> {
        let container_id = self.container_id(session_id).await?;
        let _ = self
            .run_exec(
                &container_id,
                &["docker".into(), "stop".into(), "-t".into(), timeout_secs.to_string(), container_ref.into()],
                None,
            )
            .await;
        if remove {
            let _ = self
                .run_exec(&container_id, &["docker".into(), "rm".into(), "-f".into(), container_ref.into()], None)
                .await;
        }
        Ok(())
    }

    async fn exec(
        &self,
        session_id: &str,
        argv: &[String],
        workdir: Option<&str>,
        timeout_secs: Option<u64>,
    ) -> Result<ExecResult, AppError> {
        let container_id = self.container_id(session_id).await?;
        let workdir = workdir.map(resolve).transpose()?;
        let workdir_str = workdir.as_ref().map(|p| p.display().to_string());
        let fut = self.run_exec(&container_id, argv, workdir_str.as_deref());
        match timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), fut)
                .await
                .map_err(|_| AppError::EngineError("exec timed out".to_string()))?,
            None => fut.await,
        }
    }

    async fn fs_list(&self, session_id: &str, path: &str) -> Result<FsListing, AppError> {
        let container_id = self.container_id(session_id).await?;
        let target = resolve(path)?;
        let script = format!(
            "if [ ! -e '{p}' ]; then echo '__absent__'; elif [ -d '{p}' ]; then echo '__dir__'; find '{p}' -mindepth 1 -maxdepth 1 -printf '%f\\t%y\\t%s\\t%T@\\n'; else echo '__file__'; fi",
            p = target.display()
        );
        let result = self.run_exec(&container_id, &["sh".into(), "-c".into(), script], None).await?;
        let mut lines = result.stdout.lines();
        match lines.next() {
            Some("__absent__") => Ok(FsListing { entries: vec![], exists: false, is_dir: false }),
            Some("__file__") => Ok(FsListing { entries: vec![], exists: true, is_dir: false }),
            Some("__dir__") => {
                let entries = lines
                    .filter_map(|line| {
                        let mut parts = line.splitn(4, '\t');
                        let name = parts.next()?.to_string();
                        let kind = parts.next()?;
                        let size: u64 = parts.next()?.parse().ok()?;
                        let mtime: f64 = parts.next()?.parse().ok()?;
                        Some(FsEntry {
                            path: format!("{path}/{name}"),
                            name,
                            is_dir: kind == "d",
                            size,
                            modified_at: chrono::DateTime::from_timestamp(mtime as i64, 0),
                        })
                    })
                    .collect();
                Ok(FsListing { entries, exists: true, is_dir: true })
            }
            _ => Err(AppError::EngineError("malformed fs_list output".to_string())),
        }
    }

    async fn fs_read(&self, session_id: &str, path: &str) -> Result<Vec<u8>, AppError> {
        let container_id = self.container_id(session_id).await?;
        let target = resolve(path)?;
        let result = self
            .run_exec(&container_id, &["base64".into(), target.display().to_string()], None)
            .await?;
        if result.exit_code != 0 {
            return Err(AppError::InvalidPath(path.to_string()));
        }
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, result.stdout.trim())
            .map_err(|e| AppError::EngineError(e.to_string()))
    }

    async fn fs_write(&self, session_id: &str, path: &str, bytes: &[u8]) -> Result<(), AppError> {
        let container_id = self.container_id(session_id).await?;
        let target = resolve(path)?;
        let tmp = target.with_extension("labyard.tmp");
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes);
        let script = format!(
            "echo '{encoded}' | base64 -d > '{tmp}' && mv '{tmp}' '{target}'",
            tmp = tmp.display(),
            target = target.display()
        );
        let result = self.run_exec(&container_id, &["sh".into(), "-c".into(), script], None).await?;
        if result.exit_code != 0 {
            return Err(AppError::EngineError(result.stderr));
        }
        Ok(())
    }

    async fn fs_create(
        &self,
        session_id: &str,
        path: &str,
        is_dir: bool,
        bytes: Option<&[u8]>,
    ) -> Result<(), AppError> {
        if is_dir {
            let container_id = self.container_id(session_id).await?;
            let target = resolve(path)?;
            let result = self
                .run_exec(&container_id, &["mkdir".into(), "-p".into(), target.display().to_string()], None)
                .await?;
            if result.exit_code != 0 {
                return Err(AppError::EngineError(result.stderr));
            }
            Ok(())
        } else {
            self.fs_write(session_id, path, bytes.unwrap_or(&[])).await
        }
    }

    async fn fs_rename(&self, session_id: &str, from: &str, to: &str) -> Result<(), AppError> {
        let container_id = self.container_id(session_id).await?;
        let src = resolve(from)?;
        let dst = resolve(to)?;
        let result = self
            .run_exec(&container_id, &["mv".into(), src.display().to_string(), dst.display().to_string()], None)
            .await?;
        if result.exit_code != 0 {
            return Err(AppError::EngineError(result.stderr));
        }
        Ok(())
    }

    async fn fs_delete(&self, session_id: &str, path: &str) -> Result<(), AppError> {
        let container_id = self.container_id(session_id).await?;
        let target = resolve(path)?;
        let result = self
            .run_exec(&container_id, &["rm".into(), "-rf".into(), target.display().to_string()], None)
            .await?;
        if result.exit_code != 0 {
            return Err(AppError::EngineError(result.stderr));
        }
        Ok(())
    }
}

fn parse_memory_bytes(spec: &str) -> Option<i64> {
    let spec = spec.trim();
    let (num, mult) = if let Some(n) = spec.strip_suffix('m') {
        (n, 1024 * 1024)
    } else if let Some(n) = spec.strip_suffix('g') {
        (n, 1024 * 1024 * 1024)
    } else {
        (spec, 1)
    };
    num.parse::<i64>().ok().map(|n| n * mult)
}

fn last_nonempty_line(s: &str) -> Option<String> {
    s.lines().rev().find(|l| !l.trim().is_empty()).map(str::to_string)
}

fn parse_layer_history(ndjson: &str) -> Vec<LayerInfo> {
    ndjson
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .map(|v| LayerInfo {
            id: v.get("ID").and_then(|x| x.as_str()).unwrap_or_default().to_string(),
            created_by: v.get("CreatedBy").and_then(|x| x.as_str()).unwrap_or_default().to_string(),
            size_mb: parse_docker_size_mb(v.get("Size").and_then(|x| x.as_str()).unwrap_or("0B")),
        })
        .collect()
}

fn parse_docker_size_mb(size: &str) -> f64 {
    let size = size.trim();
    let (num_part, unit) = size.split_at(size.find(|c: char| c.is_alphabetic()).unwrap_or(size.len()));
    let num: f64 = num_part.parse().unwrap_or(0.0);
    match unit.to_uppercase().as_str() {
        "B" => num / (1024.0 * 1024.0),
        "KB" => num / 1024.0,
        "MB" => num,
        "GB" => num * 1024.0,
        _ => num,
    }
}
