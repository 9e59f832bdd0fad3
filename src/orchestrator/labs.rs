//! Fixed registry of labs. A lab is identified by its slug and carries the
//! starter workspace path seeded into every new worker for that lab.

use crate::error::AppError;

#[derive(Debug, Clone, serde::Serialize)]
pub struct LabSummary {
    pub slug: String,
    pub title: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LabDetail {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub starter_path: String,
}

pub struct LabRegistry {
    labs: Vec<LabDetail>,
}

impl Default for LabRegistry {
    fn default() -> Self {
        Self {
            labs: vec![
                LabDetail {
                    slug: "first-image".to_string(),
                    title: "Your First Image".to_string(),
                    description: "Write a Dockerfile that builds a minimal image and serves a health endpoint.".to_string(),
                    starter_path: "labs/first-image".to_string(),
                },
                LabDetail {
                    slug: "layer-cache".to_string(),
                    title: "Layer Caching".to_string(),
                    description: "Order Dockerfile instructions so dependency installs cache across source edits.".to_string(),
                    starter_path: "labs/layer-cache".to_string(),
                },
                LabDetail {
                    slug: "multi-stage".to_string(),
                    title: "Multi-Stage Builds".to_string(),
                    description: "Use a builder stage to keep the final image small.".to_string(),
                    starter_path: "labs/multi-stage".to_string(),
                },
            ],
        }
    }
}

impl LabRegistry {
    pub fn list(&self) -> Vec<LabSummary> {
        self.labs
            .iter()
            .map(|l| LabSummary {
                slug: l.slug.clone(),
                title: l.title.clone(),
            })
            .collect()
    }

    pub fn get(&self, slug: &str) -> Result<&LabDetail, AppError> {
        self.labs
            .iter()
            .find(|l| l.slug == slug)
            .ok_or_else(|| AppError::LabNotFound(slug.to_string()))
    }
}
