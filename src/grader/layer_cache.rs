//! "Layer Caching": dependency manifests must be copied and installed
//! before the broader source tree, and the install step must not leave a
//! package-manager cache baked into the layer.

use async_trait::async_trait;
use serde_json::json;

use super::dockerfile::{self, Directive};
use super::{AttemptOutcome, Failure, Grader, SessionScopedSupervisor};

const NO_CACHE_FLAGS: &[&str] = &["--no-cache-dir", "--no-cache"];

pub struct LayerCacheGrader;

#[async_trait]
impl Grader for LayerCacheGrader {
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

        let manifest_copy_idx = directives.iter().position(|d| {
            matches!(d, Directive::Copy { args, .. } if is_manifest_copy(args))
        });
        let install_idx = directives.iter().position(|d| {
            matches!(d, Directive::Run { args } if is_install(args))
        });
        let source_copy_idx = directives.iter().position(|d| {
            matches!(d, Directive::Copy { args, .. } if !is_manifest_copy(args) && args.trim_start().starts_with('.'))
        });

        match (manifest_copy_idx, install_idx, source_copy_idx) {
            (Some(m), Some(i), Some(s)) if m < i && i < s => {}
            (Some(m), Some(i), None) if m < i => {}
            _ => {
                failures.push(
                    Failure::new(
                        "dependency_install_before_source_copy",
                        "copy the dependency manifest and install dependencies before copying the rest of the source",
                    )
                    .with_hint("COPY requirements.txt first, RUN pip install, then COPY the rest"),
                );
            }
        }

        if let Some(i) = install_idx {
            if let Directive::Run { args } = &directives[i] {
                if !NO_CACHE_FLAGS.iter().any(|f| args.contains(f)) {
                    failures.push(
                        Failure::new("dependency_cache_not_disabled", "install step should disable the package manager's on-disk cache")
                            .with_hint("add --no-cache-dir to pip install"),
                    );
                }
            }
        }

        if !failures.is_empty() {
            return AttemptOutcome::finish(failures, json!({}), json!({}));
        }

        let image_tag = format!("lab-layer-cache-{session_id}");
        match sup.build(".", "Dockerfile", &image_tag).await {
            Ok(result) if result.succeeded => AttemptOutcome::finish(vec![], json!({ "build": result }), json!({})),
            Ok(result) => {
                failures.push(
                    Failure::new("docker_build_failed", "image build failed")
                        .with_hint(result.hint.clone().unwrap_or_else(|| "check the build log".to_string())),
                );
                AttemptOutcome::finish(failures, json!({ "build": result }), json!({}))
            }
            Err(err) => {
                failures.push(Failure::new("docker_build_failed", err.to_string()));
                AttemptOutcome::finish(failures, json!({}), json!({}))
            }
        }
    }
}

fn is_manifest_copy(args: &str) -> bool {
    args.contains("requirements.txt") || args.contains("package.json") || args.contains("Cargo.toml")
}

fn is_install(args: &str) -> bool {
    args.contains("pip install") || args.contains("npm install") || args.contains("cargo fetch")
}
