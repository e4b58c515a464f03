use anyhow::Result;
use async_trait::async_trait;
use frameloom_contracts::records::{Concept, ScriptChoice};
use serde_json::{json, Value};

use super::{GenerationBackend, ImageJob, VideoJob};
use crate::http::ApiClient;

/// Generation endpoints of the studio API.
pub struct HttpBackend {
    client: ApiClient,
}

impl HttpBackend {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn web_info(&self, prompt: &str) -> Result<Value> {
        self.client
            .post_json("/api/web-info", &json!({ "prompt": prompt }))
            .await
    }

    async fn concepts(&self, prompt: &str, web_info: &str, model: &str) -> Result<Value> {
        self.client
            .post_json(
                "/api/concepts",
                &json!({ "prompt": prompt, "webInfo": web_info, "model": model }),
            )
            .await
    }

    async fn script(&self, concept: &Concept, model: &str, variant: ScriptChoice) -> Result<Value> {
        self.client
            .post_json(
                "/api/scripts",
                &json!({ "concept": concept, "model": model, "variant": variant }),
            )
            .await
    }

    async fn image(&self, job: &ImageJob) -> Result<Value> {
        self.client
            .post_json(
                "/api/images",
                &json!({
                    "prompt": job.prompt,
                    "style": job.style,
                    "segmentId": job.entity_key,
                    "projectId": job.project_id,
                    "model": job.model,
                }),
            )
            .await
    }

    async fn video(&self, job: &VideoJob) -> Result<Value> {
        self.client
            .post_json(
                "/api/videos",
                &json!({
                    "prompt": job.prompt,
                    "style": job.style,
                    "imageRef": job.image_ref,
                    "imageId": job.image_id,
                    "segmentId": job.segment_key,
                    "projectId": job.project_id,
                    "model": job.model,
                    "persist": job.persist,
                }),
            )
            .await
    }
}
