//! "Multi-Stage Builds": a builder stage feeds a slim final stage, and the
//! resulting image stays under the size ceiling.

use async_trait::async_trait;
use serde_json::json;

use super::dockerfile::{self, Directive};
use super::{probe_with_backoff, AttemptOutcome, Failure, Grader, SessionScopedSupervisor};

const MAX_IMAGE_SIZE_MB: f64 = 250.0;
const HEALTH_PORT: u16 = 8000;
const PROBE_ATTEMPTS: u32 = 5;

pub struct MultiStageGrader;

#[async_trait]
impl Grader for MultiStageGrader {
    async fn evaluate(&self, session_id: &str, sup: &SessionScopedSupervisor) -> AttemptOutcome {
        let mut failures = Vec::new();

        let source = match sup.fs_read("Dockerfile").await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
            Err(_) => {
                failures.push(Failure::new("dockerfile_missing", "Dockerfile not found"));
                return AttemptOutcome::finish(failures, json!({}), json!({}));
            }
        };
        let directives = dockerfile::parse(&source);

        let from_stages: Vec<(String, Option<String>)> = directives
            .iter()
            .filter_map(|d| match d {
                Directive::From { image, alias } => Some((image.clone(), alias.clone())),
                _ => None,
            })
            .collect();

        if from_stages.len() < 2 {
            failures.push(
                Failure::new("multi_stage_required", "expected at least two FROM stages")
                    .with_hint("add a builder stage with `FROM ... AS builder`"),
            );
        }

        let builder_alias = from_stages.iter().find_map(|(_, alias)| alias.clone());
        if builder_alias.is_none() {
            failures.push(Failure::new("builder_stage_unaliased", "the builder stage must have a name, e.g. `AS builder`"));
        }

        let copies_from_builder = directives.iter().any(|d| {
            matches!(d, Directive::Copy { from_stage: Some(from), .. }
                if Some(from) == builder_alias.as_ref())
        });
        if builder_alias.is_some() && !copies_from_builder {
            failures.push(
                Failure::new("copy_from_builder_missing", "final stage must COPY --from=<builder> the build output")
                    .with_hint("COPY --from=builder /app/target/release/app /app"),
            );
        }

        if !failures.is_empty() {
            return AttemptOutcome::finish(failures, json!({}), json!({}));
        }

        let image_tag = format!("lab-multi-stage-{session_id}");
        let build = match sup.build(".", "Dockerfile", &image_tag).await {
            Ok(result) if result.succeeded => result,
            Ok(result) => {
                failures.push(
                    Failure::new("docker_build_failed", "image build failed")
                        .with_hint(result.hint.clone().unwrap_or_else(|| "check the build log".to_string())),
                );
                return AttemptOutcome::finish(failures, json!({ "build": result }), json!({}));
            }
            Err(err) => {
                failures.push(Failure::new("docker_build_failed", err.to_string()));
                return AttemptOutcome::finish(failures, json!({}), json!({}));
            }
        };

        if build.image_size_mb > MAX_IMAGE_SIZE_MB {
            failures.push(
                Failure::new("image_too_large", format!("image is {:.1}MB, ceiling is {MAX_IMAGE_SIZE_MB}MB", build.image_size_mb))
                    .with_hint("trim the final stage's base image and avoid copying build tools into it"),
            );
        }

        let run = sup.run(&image_tag, &[(HEALTH_PORT, HEALTH_PORT)], true, false).await;
        if let Ok(run) = run {
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
        } else {
            failures.push(Failure::new("healthcheck_failed", "container failed to start"));
        }

        AttemptOutcome::finish(failures, json!({ "build": build }), json!({}))
    }
}
