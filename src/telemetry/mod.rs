//! Tracing subscriber setup: compact stdout formatting plus an optional
//! daily-rolling file layer. Shipping logs onward to a collector is an
//! external collaborator's job; this module only makes sure every event
//! lands somewhere durable in-process.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

/// Handle onto the live `EnvFilter` layer, so a config hot-reload can change
/// verbosity without restarting the process.
#[derive(Clone)]
pub struct FilterHandle(reload::Handle<EnvFilter, Registry>);

impl FilterHandle {
    /// Swaps in a new filter built from `log_level`. Leaves the running
    /// filter untouched if `log_level` doesn't parse as a valid directive.
    pub fn set_level(&self, log_level: &str) {
        let Ok(new_filter) = EnvFilter::try_new(log_level) else {
            tracing::warn!(log_level, "ignoring invalid LOG_LEVEL on hot reload");
            return;
        };
        if let Err(err) = self.0.reload(new_filter) {
            tracing::warn!(?err, "failed to apply reloaded log level");
        }
    }
}

/// Initializes the global subscriber. Returns a `WorkerGuard` that must be
/// held for the process lifetime when file logging is enabled (dropping it
/// flushes and stops the background writer thread), plus a `FilterHandle`
/// the config watcher uses to apply `LOG_LEVEL` changes live.
pub fn init(log_level: &str, log_file: Option<&Path>) -> (Option<WorkerGuard>, FilterHandle) {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, filter_handle) = reload::Layer::new(env_filter);

    let stdout_layer = fmt::layer().with_target(true).compact();

    let guard = match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            match std::fs::create_dir_all(dir) {
                Ok(()) => {
                    let file_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| "labyard.log".to_string());
                    let appender = tracing_appender::rolling::daily(dir, file_name);
                    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                    let file_layer = fmt::layer().with_ansi(false).json().with_writer(non_blocking);

                    tracing_subscriber::registry()
                        .with(filter_layer)
                        .with(stdout_layer)
                        .with(file_layer)
                        .init();
                    Some(guard)
                }
                Err(err) => {
                    tracing_subscriber::registry()
                        .with(filter_layer)
                        .with(stdout_layer)
                        .init();
                    tracing::warn!(?err, path = %path.display(), "could not create log directory, falling back to stdout only");
                    None
                }
            }
        }
        None => {
            tracing_subscriber::registry()
                .with(filter_layer)
                .with(stdout_layer)
                .init();
            None
        }
    };

    (guard, FilterHandle(filter_handle))
}
