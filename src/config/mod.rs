//! Layered configuration: CLI flag / env var > `config.toml` > built-in
//! default. A small hot-reloadable subset is watched on disk so operators
//! can tune rate limits and log verbosity without a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_full::{new_debouncer, notify::RecursiveMode};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::telemetry::FilterHandle;

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_SESSION_TTL_SECONDS: u64 = 1800;
const DEFAULT_TTL_SWEEP_INTERVAL_SECONDS: u64 = 30;
const DEFAULT_AGENT_RATE_LIMIT_PER_MIN: u32 = 5;
const DEFAULT_MAX_CONCURRENT_WORKERS: u32 = 50;
const DEFAULT_RUNNER_MEMORY: &str = "1536m";
const DEFAULT_RUNNER_CPU_QUOTA: f64 = 1.0;
const DEFAULT_RUNNER_PID_LIMIT: u32 = 512;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    pub http_port: Option<u16>,
    pub session_ttl_seconds: Option<u64>,
    pub ttl_sweep_interval_seconds: Option<u64>,
    pub agent_rate_limit_per_min: Option<u32>,
    pub max_concurrent_workers: Option<u32>,
    pub runner_memory: Option<String>,
    pub runner_cpu_quota: Option<f64>,
    pub runner_pid_limit: Option<u32>,
    pub supervisor_base_url: Option<String>,
    pub store_path: Option<String>,
    pub cors_allow_origins: Option<String>,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
}

/// The subset of config that may change without a process restart.
#[derive(Debug, Clone)]
pub struct HotConfig {
    pub log_level: String,
    pub agent_rate_limit_per_min: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_port: u16,
    pub session_ttl_seconds: u64,
    pub ttl_sweep_interval_seconds: u64,
    pub max_concurrent_workers: u32,
    pub runner_memory: String,
    pub runner_cpu_quota: f64,
    pub runner_pid_limit: u32,
    pub supervisor_base_url: String,
    pub store_path: PathBuf,
    pub cors_allow_origins: Vec<String>,
    pub log_file: Option<PathBuf>,
    pub token_secret: String,
    pub hot: Arc<RwLock<HotConfig>>,
}

/// CLI-provided overrides, already parsed by clap; `None` means "not given
/// on the command line or via env", deferring to the TOML file or default.
pub struct CliOverrides {
    pub http_port: Option<u16>,
    pub session_ttl_seconds: Option<u64>,
    pub store_path: Option<String>,
    pub supervisor_base_url: Option<String>,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub token_secret: Option<String>,
}

impl AppConfig {
    pub fn new(cli: CliOverrides, toml_path: &Path) -> Self {
        let toml_cfg = load_toml(toml_path);

        let http_port = cli
            .http_port
            .or(toml_cfg.http_port)
            .unwrap_or(DEFAULT_HTTP_PORT);
        let session_ttl_seconds = cli
            .session_ttl_seconds
            .or(toml_cfg.session_ttl_seconds)
            .unwrap_or(DEFAULT_SESSION_TTL_SECONDS);
        let ttl_sweep_interval_seconds = toml_cfg
            .ttl_sweep_interval_seconds
            .unwrap_or(DEFAULT_TTL_SWEEP_INTERVAL_SECONDS);
        let agent_rate_limit_per_min = toml_cfg
            .agent_rate_limit_per_min
            .unwrap_or(DEFAULT_AGENT_RATE_LIMIT_PER_MIN);
        let max_concurrent_workers = toml_cfg
            .max_concurrent_workers
            .unwrap_or(DEFAULT_MAX_CONCURRENT_WORKERS);
        let runner_memory = toml_cfg
            .runner_memory
            .clone()
            .unwrap_or_else(|| DEFAULT_RUNNER_MEMORY.to_string());
        let runner_cpu_quota = toml_cfg.runner_cpu_quota.unwrap_or(DEFAULT_RUNNER_CPU_QUOTA);
        let runner_pid_limit = toml_cfg.runner_pid_limit.unwrap_or(DEFAULT_RUNNER_PID_LIMIT);
        let supervisor_base_url = cli
            .supervisor_base_url
            .or(toml_cfg.supervisor_base_url.clone())
            .unwrap_or_else(|| "http://127.0.0.1:8081".to_string());
        let store_path = cli
            .store_path
            .or(toml_cfg.store_path.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir().join("labyard.db"));
        let cors_allow_origins = toml_cfg
            .cors_allow_origins
            .as_deref()
            .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
            .unwrap_or_default();
        let log_level = cli
            .log_level
            .or(toml_cfg.log_level.clone())
            .unwrap_or_else(|| "info".to_string());
        let log_file = cli
            .log_file
            .or(toml_cfg.log_file.clone())
            .map(PathBuf::from);
        let token_secret = cli.token_secret.unwrap_or_else(|| "dev-insecure-secret".to_string());

        Self {
            http_port,
            session_ttl_seconds,
            ttl_sweep_interval_seconds,
            max_concurrent_workers,
            runner_memory,
            runner_cpu_quota,
            runner_pid_limit,
            supervisor_base_url,
            store_path,
            cors_allow_origins,
            log_file,
            token_secret,
            hot: Arc::new(RwLock::new(HotConfig {
                log_level,
                agent_rate_limit_per_min,
            })),
        }
    }
}

fn load_toml(path: &Path) -> TomlConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
            tracing::warn!(?err, path = %path.display(), "malformed config.toml, using defaults");
            TomlConfig::default()
        }),
        Err(_) => TomlConfig::default(),
    }
}

pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        dirs_data_dir().join("Labyard")
    }
    #[cfg(target_os = "linux")]
    {
        dirs_data_dir().join("labyard")
    }
    #[cfg(target_os = "windows")]
    {
        dirs_data_dir().join("Labyard")
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from(".labyard")
    }
}

#[cfg(any(target_os = "macos", target_os = "linux", target_os = "windows"))]
fn dirs_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("share")
}

/// Watches `config.toml`'s parent directory (not the file itself, so the
/// watch survives editors that replace-on-save rather than write-in-place)
/// and reloads `HotConfig` on a 2s debounce.
pub struct ConfigWatcher {
    _debouncer: notify_debouncer_full::Debouncer<
        notify_debouncer_full::notify::RecommendedWatcher,
        notify_debouncer_full::RecommendedCache,
    >,
}

impl ConfigWatcher {
    pub fn spawn(toml_path: PathBuf, hot: Arc<RwLock<HotConfig>>, filter: FilterHandle) -> anyhow::Result<Self> {
        let watch_dir = toml_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let mut debouncer = new_debouncer(
            Duration::from_secs(2),
            None,
            move |result: notify_debouncer_full::DebounceEventResult| {
                let Ok(events) = result else { return };
                let touched = events
                    .iter()
                    .any(|e| e.paths.iter().any(|p| p == &toml_path));
                if !touched {
                    return;
                }
                let toml_path = toml_path.clone();
                let hot = hot.clone();
                let filter = filter.clone();
                tokio::spawn(async move {
                    let cfg = load_toml(&toml_path);
                    let mut guard = hot.write().await;
                    if let Some(level) = cfg.log_level {
                        filter.set_level(&level);
                        guard.log_level = level;
                    }
                    if let Some(limit) = cfg.agent_rate_limit_per_min {
                        guard.agent_rate_limit_per_min = limit;
                    }
                    tracing::info!("reloaded hot config");
                });
            },
        )?;
        debouncer.watch(&watch_dir, RecursiveMode::NonRecursive)?;
        Ok(Self {
            _debouncer: debouncer,
        })
    }
}
