//! Background sweeper that ends sessions past their `expires_at` even if no
//! client ever calls `stop_session`. Defense in depth alongside the
//! supervisor's own independent sweeper (see `engine::DockerSupervisor`).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::Orchestrator;

pub fn spawn(orchestrator: Arc<Orchestrator>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            if let Err(err) = sweep_once(&orchestrator).await {
                tracing::error!(?err, "ttl sweep failed");
            }
        }
    })
}

async fn sweep_once(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    let now = Utc::now();
    let expired = orchestrator.storage.sweepable_sessions(now).await?;
    for session in expired {
        tracing::info!(session_id = %session.id, "sweeping expired session");
        if let Err(err) = orchestrator.supervisor.stop(&session.id).await {
            tracing::warn!(session_id = %session.id, ?err, "supervisor stop failed during sweep");
        }
        orchestrator
            .storage
            .end_session_if_active(&session.id, session.expires_at)
            .await?;
        orchestrator.rate_limiter.forget(&session.id);
    }
    Ok(())
}
