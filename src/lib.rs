pub mod auth;
pub mod config;
pub mod error;
pub mod grader;
pub mod orchestrator;
pub mod rest;
pub mod security;
pub mod storage;
pub mod supervisor;
pub mod telemetry;

use std::sync::Arc;

use config::AppConfig;
use orchestrator::Orchestrator;
use storage::Storage;

/// Shared state threaded into every REST handler. Built once in `main` and
/// cloned (cheaply, behind `Arc`) into the router.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub storage: Arc<Storage>,
    pub orchestrator: Arc<Orchestrator>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    pub fn new(config: Arc<AppConfig>, storage: Arc<Storage>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            storage,
            orchestrator,
            started_at: std::time::Instant::now(),
        }
    }
}
