//! Project data collaborator: the server's record of segmentations,
//! images and videos.

use anyhow::{Context, Result};
use async_trait::async_trait;
use frameloom_contracts::records::{
    ApiEnvelope, GeneratedVideo, ImageRecord, ProjectRecord, SegmentationRecord, SelectedScript,
    VideoRecord,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::http::ApiClient;

/// Every call answers with an [`ApiEnvelope`]; `success = false` and a
/// returned error are both fetch failures to the caller.
#[async_trait]
pub trait ProjectDataSource: Send + Sync {
    async fn get_segmentations(&self, project_id: &str) -> Result<ApiEnvelope<SegmentationRecord>>;

    async fn get_images(&self, project_id: &str) -> Result<ApiEnvelope<ImageRecord>>;

    async fn get_videos(&self, project_id: &str) -> Result<ApiEnvelope<VideoRecord>>;

    async fn set_primary_image(
        &self,
        project_id: &str,
        image_id: &str,
    ) -> Result<ApiEnvelope<ImageRecord>>;

    async fn create_project(
        &self,
        name: &str,
        description: &str,
    ) -> Result<ApiEnvelope<ProjectRecord>>;

    async fn save_segmentation(
        &self,
        project_id: &str,
        script: &SelectedScript,
    ) -> Result<ApiEnvelope<SegmentationRecord>>;

    /// Promote a preview video into the project record.
    async fn save_video(
        &self,
        project_id: &str,
        video: &GeneratedVideo,
    ) -> Result<ApiEnvelope<VideoRecord>>;
}

pub struct HttpProjectSource {
    client: ApiClient,
}

impl HttpProjectSource {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<ApiEnvelope<T>> {
        let raw = self.client.get_json(path).await?;
        envelope(path, raw)
    }

    async fn submit<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<ApiEnvelope<T>> {
        let raw = self.client.post_json(path, body).await?;
        envelope(path, raw)
    }
}

fn envelope<T: DeserializeOwned>(path: &str, raw: Value) -> Result<ApiEnvelope<T>> {
    // Some endpoints answer with a single object instead of a list.
    let raw = match raw {
        Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
            if let Some(data) = map.remove("data") {
                map.insert("data".to_string(), Value::Array(vec![data]));
            }
            Value::Object(map)
        }
        other => other,
    };
    serde_json::from_value(raw).with_context(|| format!("{path} returned an unexpected envelope"))
}

#[async_trait]
impl ProjectDataSource for HttpProjectSource {
    async fn get_segmentations(&self, project_id: &str) -> Result<ApiEnvelope<SegmentationRecord>> {
        self.fetch(&format!("/api/projects/{project_id}/segmentations"))
            .await
    }

    async fn get_images(&self, project_id: &str) -> Result<ApiEnvelope<ImageRecord>> {
        self.fetch(&format!("/api/projects/{project_id}/images")).await
    }

    async fn get_videos(&self, project_id: &str) -> Result<ApiEnvelope<VideoRecord>> {
        self.fetch(&format!("/api/projects/{project_id}/videos")).await
    }

    async fn set_primary_image(
        &self,
        project_id: &str,
        image_id: &str,
    ) -> Result<ApiEnvelope<ImageRecord>> {
        self.submit(
            &format!("/api/projects/{project_id}/images/{image_id}/primary"),
            &json!({}),
        )
        .await
    }

    async fn create_project(
        &self,
        name: &str,
        description: &str,
    ) -> Result<ApiEnvelope<ProjectRecord>> {
        self.submit(
            "/api/projects",
            &json!({ "name": name, "description": description }),
        )
        .await
    }

    async fn save_segmentation(
        &self,
        project_id: &str,
        script: &SelectedScript,
    ) -> Result<ApiEnvelope<SegmentationRecord>> {
        self.submit(
            &format!("/api/projects/{project_id}/segmentations"),
            &json!({
                "segments": script.segments,
                "artStyle": script.art_style,
                "concept": script.concept,
            }),
        )
        .await
    }

    async fn save_video(
        &self,
        project_id: &str,
        video: &GeneratedVideo,
    ) -> Result<ApiEnvelope<VideoRecord>> {
        self.submit(
            &format!("/api/projects/{project_id}/videos"),
            &json!({
                "segmentId": video.segment_key,
                "imageId": video.image_id,
                "artStyle": video.art_style,
                "files": [{ "storageKey": video.storage_key, "url": video.url }],
            }),
        )
        .await
    }
}
