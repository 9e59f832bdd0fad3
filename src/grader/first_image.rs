//! "Your First Image": build succeeds, `.dockerignore` excludes the usual
//! Python build artifacts, the container answers `GET /health` with JSON.

use async_trait::async_trait;
use serde_json::json;

use super::{probe_with_backoff, AttemptOutcome, Failure, Grader, SessionScopedSupervisor};

const HEALTH_PORT: u16 = 8000;
const PROBE_ATTEMPTS: u32 = 5;

pub struct FirstImageGrader;

#[async_trait]
impl Grader for FirstImageGrader {
    async fn evaluate(&self, session_id: &str, sup: &SessionScopedSupervisor) -> AttemptOutcome {
        let mut failures = Vec::new();

        let dockerignore = sup.fs_read(".dockerignore").await.unwrap_or_default();
        let text = String::from_utf8_lossy(&dockerignore);
        if !text.contains("__pycache__") || !text.contains("venv") {
            failures.push(
                Failure::new("dockerignore_missing", ".dockerignore must exclude __pycache__ and venv")
                    .with_hint("add `__pycache__/` and `venv/` to .dockerignore"),
            );
            return AttemptOutcome::finish(failures, json!({}), json!({}));
        }

        let image_tag = format!("lab-first-image-{session_id}");
        let build = match sup.build(".", "Dockerfile", &image_tag).await {
            Ok(result) if result.succeeded => result,
            Ok(result) => {
                failures.push(Failure::new("docker_build_failed", "image build failed").with_hint(
                    result.hint.clone().unwrap_or_else(|| "check the build log".to_string()),
                ));
                return AttemptOutcome::finish(failures, json!({ "build": result }), json!({}));
            }
            Err(err) => {
                failures.push(Failure::new("docker_build_failed", err.to_string()));
                return AttemptOutcome::finish(failures, json!({}), json!({}));
            }
        };

        let run = sup
            .run(&image_tag, &[(HEALTH_PORT, HEALTH_PORT)], true, false)
            .await;
        let Ok(run) = run else {
            failures.push(Failure::new("healthcheck_failed", "container failed to start"));
            return AttemptOutcome::finish(failures, json!({ "build": build }), json!({}));
        };

        let url = format!("http://localhost:{HEALTH_PORT}/health");
        let healthy = probe_with_backoff(
            || {
                let sup = sup;
                let url = url.clone();
                async move {
                    sup.exec(&["curl".into(), "-sf".into(), url.clone()], None, Some(5))
                        .await
                        .map(|r| r.exit_code == 0 && serde_json::from_str::<serde_json::Value>(&r.stdout).is_ok())
                        .unwrap_or(false)
                }
            },
            PROBE_ATTEMPTS,
        )
        .await;

        let _ = sup.stop_run(&run.container_ref, 5, true).await;

        if !healthy {
            failures.push(Failure::new("healthcheck_failed", "GET /health did not respond with 200"));
        }

        AttemptOutcome::finish(failures, json!({ "build": build }), json!({}))
    }
}
