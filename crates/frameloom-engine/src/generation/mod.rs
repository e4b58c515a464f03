//! Generation service facade.
//!
//! Backends speak raw JSON. [`GenerationFacade`] sanitises prompts on the
//! way in, honours the abort signal around every call and turns responses
//! into the shapes the pipeline consumes.

mod dryrun;
mod http;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use frameloom_contracts::ids::video_key;
use frameloom_contracts::records::{Concept, ScriptChoice, ScriptDraft};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::abort::AbortSignal;
use crate::sanitize::sanitize_prompt;

pub use dryrun::DryrunStudio;
pub use http::HttpBackend;

const STORAGE_KEY_FIELDS: [&str; 5] = ["storageKey", "storage_key", "s3Key", "s3_key", "key"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageJob {
    pub prompt: String,
    pub style: String,
    pub entity_key: String,
    pub project_id: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoJob {
    pub prompt: String,
    pub style: String,
    /// Storage key of the source image.
    pub image_ref: String,
    pub image_id: Option<String>,
    pub segment_key: String,
    pub project_id: String,
    pub model: String,
    /// False for previews the server must not record yet.
    pub persist: bool,
}

impl VideoJob {
    /// Tracker key: one video task per segment/image pair.
    pub fn entity_key(&self) -> String {
        video_key(&self.segment_key, self.image_id.as_deref())
    }
}

/// Uniform result of an image or video call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub storage_key: String,
    pub raw: Value,
}

impl GenerationResult {
    fn from_raw(what: &str, raw: Value) -> Result<Self> {
        let storage_key = find_storage_key(&raw)
            .with_context(|| format!("{what} response carried no storage key"))?;
        Ok(Self { storage_key, raw })
    }

    /// A string field from the response body or its `data` object.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.raw
            .get(key)
            .or_else(|| self.raw.get("data").and_then(|data| data.get(key)))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Download URL, from the body or the first returned file.
    pub fn url(&self) -> Option<&str> {
        self.field("url").or_else(|| {
            unwrap_data(&self.raw)
                .get("files")
                .and_then(Value::as_array)
                .and_then(|files| files.first())
                .and_then(|file| file.get("url"))
                .and_then(Value::as_str)
        })
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn web_info(&self, prompt: &str) -> Result<Value>;

    async fn concepts(&self, prompt: &str, web_info: &str, model: &str) -> Result<Value>;

    async fn script(&self, concept: &Concept, model: &str, variant: ScriptChoice) -> Result<Value>;

    async fn image(&self, job: &ImageJob) -> Result<Value>;

    async fn video(&self, job: &VideoJob) -> Result<Value>;
}

#[derive(Clone)]
pub struct GenerationFacade {
    backend: Arc<dyn GenerationBackend>,
}

impl GenerationFacade {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Contextual lookup that seeds concept generation.
    pub async fn web_info(&self, prompt: &str, abort: &AbortSignal) -> Result<String> {
        let prompt = required_prompt(prompt)?;
        abort.check()?;
        let raw = self.backend.web_info(&prompt).await?;
        abort.check()?;
        Ok(text_payload(unwrap_data(&raw)))
    }

    pub async fn generate_concepts(
        &self,
        prompt: &str,
        web_info: &str,
        model: &str,
        abort: &AbortSignal,
    ) -> Result<Vec<Concept>> {
        let prompt = required_prompt(prompt)?;
        let context = sanitize_prompt(web_info);
        abort.check()?;
        let raw = self.backend.concepts(&prompt, &context, model).await?;
        abort.check()?;
        let data = unwrap_data(&raw);
        let list = data.get("concepts").unwrap_or(data);
        let concepts: Vec<Concept> = serde_json::from_value(list.clone())
            .context("concept response is not a list of concepts")?;
        if concepts.is_empty() {
            bail!("concept generation returned no concepts");
        }
        Ok(concepts)
    }

    pub async fn generate_script(
        &self,
        concept: &Concept,
        model: &str,
        variant: ScriptChoice,
        abort: &AbortSignal,
    ) -> Result<ScriptDraft> {
        abort.check()?;
        let raw = self.backend.script(concept, model, variant).await?;
        abort.check()?;
        let data = unwrap_data(&raw);
        let mut draft: ScriptDraft = serde_json::from_value(data.clone())
            .context("script response has no segment list")?;
        if draft.art_style.is_empty() {
            if let Some(style) = data.get("art_style").and_then(Value::as_str) {
                draft.art_style = style.to_string();
            }
        }
        if draft.segments.is_empty() {
            bail!("script generation returned no segments");
        }
        Ok(draft)
    }

    pub async fn generate_image(
        &self,
        job: &ImageJob,
        abort: &AbortSignal,
    ) -> Result<GenerationResult> {
        let job = ImageJob {
            prompt: required_prompt(&job.prompt)?,
            style: sanitize_prompt(&job.style),
            ..job.clone()
        };
        abort.check()?;
        tracing::debug!(backend = self.backend.name(), entity_key = %job.entity_key, model = %job.model, "image request");
        let raw = self
            .backend
            .image(&job)
            .await
            .with_context(|| format!("image for segment {} failed", job.entity_key))?;
        abort.check()?;
        GenerationResult::from_raw("image", raw)
    }

    pub async fn generate_video(
        &self,
        job: &VideoJob,
        abort: &AbortSignal,
    ) -> Result<GenerationResult> {
        let job = VideoJob {
            prompt: required_prompt(&job.prompt)?,
            style: sanitize_prompt(&job.style),
            ..job.clone()
        };
        if job.image_ref.trim().is_empty() {
            bail!("video for {} has no source image", job.entity_key());
        }
        abort.check()?;
        tracing::debug!(backend = self.backend.name(), entity_key = %job.entity_key(), model = %job.model, "video request");
        let raw = self
            .backend
            .video(&job)
            .await
            .with_context(|| format!("video for {} failed", job.entity_key()))?;
        abort.check()?;
        GenerationResult::from_raw("video", raw)
    }
}

fn required_prompt(raw: &str) -> Result<String> {
    let prompt = sanitize_prompt(raw);
    if prompt.is_empty() {
        bail!("prompt is empty after sanitising");
    }
    Ok(prompt)
}

fn unwrap_data(raw: &Value) -> &Value {
    match raw.get("data") {
        Some(data @ (Value::Object(_) | Value::Array(_))) => data,
        _ => raw,
    }
}

fn text_payload(value: &Value) -> String {
    if let Some(text) = value.as_str() {
        return text.trim().to_string();
    }
    for key in ["summary", "content", "text"] {
        if let Some(text) = value.get(key).and_then(Value::as_str) {
            return text.trim().to_string();
        }
    }
    if value.is_null() {
        return String::new();
    }
    value.to_string()
}

fn find_storage_key(raw: &Value) -> Option<String> {
    let direct = |value: &Value| {
        STORAGE_KEY_FIELDS.iter().find_map(|field| {
            value
                .get(*field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
        })
    };
    direct(raw)
        .or_else(|| raw.get("data").and_then(direct))
        .or_else(|| {
            unwrap_data(raw)
                .get("files")
                .and_then(Value::as_array)
                .and_then(|files| files.iter().find_map(direct))
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    /// Replays canned responses and records the prompts it was sent.
    #[derive(Default)]
    struct Canned {
        response: Value,
        prompts: Mutex<Vec<String>>,
    }

    impl Canned {
        fn new(response: Value) -> Self {
            Self {
                response,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, prompt: &str) -> Result<Value> {
            self.prompts
                .lock()
                .map_err(|_| anyhow::anyhow!("lock"))?
                .push(prompt.to_string());
            Ok(self.response.clone())
        }
    }

    #[async_trait]
    impl GenerationBackend for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn web_info(&self, prompt: &str) -> Result<Value> {
            self.record(prompt)
        }

        async fn concepts(&self, prompt: &str, _web_info: &str, _model: &str) -> Result<Value> {
            self.record(prompt)
        }

        async fn script(&self, concept: &Concept, _model: &str, _variant: ScriptChoice) -> Result<Value> {
            self.record(&concept.title)
        }

        async fn image(&self, job: &ImageJob) -> Result<Value> {
            self.record(&job.prompt)
        }

        async fn video(&self, job: &VideoJob) -> Result<Value> {
            self.record(&job.prompt)
        }
    }

    fn image_job(prompt: &str) -> ImageJob {
        ImageJob {
            prompt: prompt.to_string(),
            style: "ink".to_string(),
            entity_key: "2".to_string(),
            project_id: "p".to_string(),
            model: "flux-schnell".to_string(),
        }
    }

    #[tokio::test]
    async fn image_prompts_are_sanitised_and_keys_normalised() -> Result<()> {
        let backend = Arc::new(Canned::new(json!({"data": {"s3_key": "images/2.png"}})));
        let facade = GenerationFacade::new(backend.clone());
        let result = facade
            .generate_image(&image_job("a dog\n on\ta  beach \u{1F436}"), &AbortSignal::new())
            .await?;
        assert_eq!(result.storage_key, "images/2.png");
        let prompts = backend.prompts.lock().map_err(|_| anyhow::anyhow!("lock"))?.clone();
        assert_eq!(prompts, vec!["a dog on a beach".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_storage_key_is_an_error() {
        let facade = GenerationFacade::new(Arc::new(Canned::new(json!({"status": "ok"}))));
        let err = facade
            .generate_image(&image_job("dunes"), &AbortSignal::new())
            .await
            .err()
            .map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("image response carried no storage key"));
    }

    #[tokio::test]
    async fn video_key_can_come_from_the_file_list() -> Result<()> {
        let facade = GenerationFacade::new(Arc::new(Canned::new(
            json!({"uuid": "v9", "files": [{"storageKey": "videos/9.mp4"}]}),
        )));
        let job = VideoJob {
            prompt: "pan left".to_string(),
            style: String::new(),
            image_ref: "images/9.png".to_string(),
            image_id: Some("seg-9".to_string()),
            segment_key: "9".to_string(),
            project_id: "p".to_string(),
            model: "kling-v2".to_string(),
            persist: true,
        };
        assert_eq!(job.entity_key(), "9-seg-9");
        let result = facade.generate_video(&job, &AbortSignal::new()).await?;
        assert_eq!(result.storage_key, "videos/9.mp4");
        assert_eq!(result.field("uuid"), Some("v9"));
        assert_eq!(result.url(), None);
        Ok(())
    }

    #[tokio::test]
    async fn aborted_calls_never_reach_the_backend() {
        let backend = Arc::new(Canned::new(json!({"storageKey": "k"})));
        let facade = GenerationFacade::new(backend.clone());
        let abort = AbortSignal::new();
        abort.abort();
        let err = facade
            .generate_image(&image_job("dunes"), &abort)
            .await
            .err()
            .map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("cancelled"));
        assert!(backend.prompts.lock().map(|p| p.is_empty()).unwrap_or(false));
    }

    #[tokio::test]
    async fn blank_prompts_are_rejected_before_the_call() {
        let backend = Arc::new(Canned::new(json!({"storageKey": "k"})));
        let facade = GenerationFacade::new(backend.clone());
        let result = facade.generate_image(&image_job(" \n\u{1F436} "), &AbortSignal::new()).await;
        assert!(result.is_err());
        assert!(backend.prompts.lock().map(|p| p.is_empty()).unwrap_or(false));
    }

    #[tokio::test]
    async fn concepts_accept_wrapped_and_bare_lists() -> Result<()> {
        let wrapped = GenerationFacade::new(Arc::new(Canned::new(json!({
            "success": true,
            "data": {"concepts": [{"title": "Tide", "logline": "x"}]}
        }))));
        let bare = GenerationFacade::new(Arc::new(Canned::new(json!([
            {"title": "Tide"}, {"title": "Dunes"}
        ]))));
        let abort = AbortSignal::new();
        assert_eq!(wrapped.generate_concepts("dog", "", "m", &abort).await?.len(), 1);
        assert_eq!(bare.generate_concepts("dog", "", "m", &abort).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn scripts_read_either_art_style_spelling() -> Result<()> {
        let facade = GenerationFacade::new(Arc::new(Canned::new(json!({
            "segments": [{"id": 1, "visual": "a"}],
            "art_style": "noir"
        }))));
        let concept = Concept {
            title: "Tide".to_string(),
            logline: String::new(),
            tone: String::new(),
        };
        let draft = facade
            .generate_script(&concept, "m", ScriptChoice::A, &AbortSignal::new())
            .await?;
        assert_eq!(draft.art_style, "noir");
        assert_eq!(draft.segments[0].id, "1");
        Ok(())
    }

    #[test]
    fn web_info_text_prefers_summary_fields() {
        assert_eq!(text_payload(&json!({"summary": " beaches "})), "beaches");
        assert_eq!(text_payload(&json!("plain")), "plain");
        assert_eq!(text_payload(&Value::Null), "");
    }
}
