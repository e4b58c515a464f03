use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use frameloom_contracts::records::{
    ApiEnvelope, Concept, GeneratedVideo, ImageRecord, ProjectRecord, RawId, ScriptChoice,
    ScriptDraft, Segment, SegmentationRecord, SelectedScript, VideoFile, VideoRecord,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{GenerationBackend, ImageJob, VideoJob};
use crate::project_source::ProjectDataSource;

/// Millisecond epoch the logical clock starts from, so suffixed ids look
/// like the timestamps real services mint.
const CLOCK_EPOCH_MS: u64 = 1_700_000_000_000;

const CONCEPT_ANGLES: [(&str, &str); 3] = [
    ("Documentary", "grounded"),
    ("Whimsical", "playful"),
    ("Noir", "moody"),
];

const SCRIPT_BEATS: [(&str, &str); 5] = [
    ("Establishing wide shot", "slow push in"),
    ("Close-up", "gentle handheld drift"),
    ("Action beat", "fast tracking pan"),
    ("Turning point", "crane up"),
    ("Closing shot", "slow fade out"),
];

/// Offline studio: deterministic generation plus an in-memory project
/// server. Generated images and persisted videos land in the project
/// record so a refresh sees what a batch produced.
#[derive(Default)]
pub struct DryrunStudio {
    state: Mutex<StudioState>,
    latency: Option<Duration>,
}

#[derive(Default)]
struct StudioState {
    next_project: u64,
    clock: u64,
    projects: BTreeMap<String, StudioProject>,
    failing_prompts: Vec<String>,
    fail_fetches: bool,
    script: Option<ScriptDraft>,
    image_calls: usize,
    video_calls: usize,
}

struct StudioProject {
    record: ProjectRecord,
    segmentations: Vec<SegmentationRecord>,
    images: Vec<ImageRecord>,
    videos: Vec<VideoRecord>,
}

impl DryrunStudio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every generation call, so batches visibly overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail generation calls whose prompt contains `fragment`.
    pub fn fail_prompts_containing(&self, fragment: &str) {
        self.lock().failing_prompts.push(fragment.to_string());
    }

    /// Make every project fetch answer `success = false`.
    pub fn set_fail_fetches(&self, fail: bool) {
        self.lock().fail_fetches = fail;
    }

    /// Serve `draft` for both script variants instead of the built-in one.
    pub fn set_script(&self, draft: ScriptDraft) {
        self.lock().script = Some(draft);
    }

    pub fn image_calls(&self) -> usize {
        self.lock().image_calls
    }

    pub fn video_calls(&self) -> usize {
        self.lock().video_calls
    }

    pub fn image_records(&self, project_id: &str) -> Vec<ImageRecord> {
        self.lock()
            .projects
            .get(project_id)
            .map(|project| project.images.clone())
            .unwrap_or_default()
    }

    pub fn video_records(&self, project_id: &str) -> Vec<VideoRecord> {
        self.lock()
            .projects
            .get(project_id)
            .map(|project| project.videos.clone())
            .unwrap_or_default()
    }

    async fn pause(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StudioState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StudioState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn check_prompt(&self, prompt: &str) -> Result<()> {
        if let Some(fragment) = self
            .failing_prompts
            .iter()
            .find(|fragment| prompt.contains(fragment.as_str()))
        {
            bail!("dryrun backend rejected prompt matching '{fragment}'");
        }
        Ok(())
    }

    fn project_mut(&mut self, project_id: &str) -> Result<&mut StudioProject> {
        match self.projects.get_mut(project_id) {
            Some(project) => Ok(project),
            None => bail!("unknown project {project_id}"),
        }
    }

    fn fetch<T>(&self, project_id: &str, pick: impl Fn(&StudioProject) -> Vec<T>) -> ApiEnvelope<T> {
        if self.fail_fetches {
            return ApiEnvelope::failed("dryrun fetches disabled");
        }
        match self.projects.get(project_id) {
            Some(project) => ApiEnvelope::ok(pick(project)),
            None => ApiEnvelope::failed(format!("unknown project {project_id}")),
        }
    }
}

fn short_id(seed: &str, tick: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(tick.to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

fn default_script(concept: &Concept, variant: ScriptChoice) -> ScriptDraft {
    let art_style = match variant {
        ScriptChoice::A => "storybook watercolor",
        ScriptChoice::B => "cinematic film still",
    };
    ScriptDraft {
        segments: SCRIPT_BEATS
            .iter()
            .enumerate()
            .map(|(idx, (beat, motion))| Segment {
                id: (idx + 1).to_string(),
                visual: format!("{beat} of {}", concept.title),
                narration: format!("{} ({beat}).", concept.logline),
                animation: (*motion).to_string(),
            })
            .collect(),
        art_style: art_style.to_string(),
    }
}

#[async_trait]
impl GenerationBackend for DryrunStudio {
    fn name(&self) -> &str {
        "dryrun"
    }

    async fn web_info(&self, prompt: &str) -> Result<Value> {
        self.pause().await;
        self.lock().check_prompt(prompt)?;
        Ok(json!({
            "success": true,
            "data": { "summary": format!("Reference notes for {prompt}: light, setting, motion.") }
        }))
    }

    async fn concepts(&self, prompt: &str, _web_info: &str, model: &str) -> Result<Value> {
        self.pause().await;
        self.lock().check_prompt(prompt)?;
        let concepts: Vec<Concept> = CONCEPT_ANGLES
            .iter()
            .map(|(angle, tone)| Concept {
                title: format!("{angle}: {prompt}"),
                logline: format!("A {tone} take on {prompt}"),
                tone: (*tone).to_string(),
            })
            .collect();
        Ok(json!({ "success": true, "model": model, "data": { "concepts": concepts } }))
    }

    async fn script(&self, concept: &Concept, model: &str, variant: ScriptChoice) -> Result<Value> {
        self.pause().await;
        let draft = self
            .lock()
            .script
            .clone()
            .unwrap_or_else(|| default_script(concept, variant));
        Ok(json!({ "success": true, "model": model, "data": draft }))
    }

    async fn image(&self, job: &ImageJob) -> Result<Value> {
        self.pause().await;
        let mut state = self.lock();
        state.image_calls += 1;
        state.check_prompt(&job.prompt)?;
        let tick = state.tick();
        let project = state.project_mut(&job.project_id)?;
        let first_for_segment = !project.images.iter().any(|image| {
            image
                .segment_id
                .as_ref()
                .is_some_and(|id| id.to_string() == job.entity_key)
        });
        let uuid = if first_for_segment {
            format!("seg-{}", job.entity_key)
        } else {
            format!("seg-{}-{}", job.entity_key, CLOCK_EPOCH_MS + tick)
        };
        let storage_key = format!(
            "images/{}/{}-{}.png",
            job.project_id,
            job.entity_key,
            short_id(&job.prompt, tick)
        );
        let url = format!("dryrun://{storage_key}");
        project.images.push(ImageRecord {
            uuid: Some(uuid.clone()),
            segment_id: Some(RawId::Text(job.entity_key.clone())),
            success: true,
            storage_key: Some(storage_key.clone()),
            url: Some(url.clone()),
            visual_prompt: Some(job.prompt.clone()),
            art_style: Some(job.style.clone()),
            is_primary: None,
        });
        Ok(json!({
            "success": true,
            "data": { "uuid": uuid, "storageKey": storage_key, "url": url, "model": job.model }
        }))
    }

    async fn video(&self, job: &VideoJob) -> Result<Value> {
        self.pause().await;
        let mut state = self.lock();
        state.video_calls += 1;
        state.check_prompt(&job.prompt)?;
        let tick = state.tick();
        let project = state.project_mut(&job.project_id)?;
        let uuid = format!("vid-{}", CLOCK_EPOCH_MS + tick);
        let storage_key = format!(
            "videos/{}/{}-{}.mp4",
            job.project_id,
            job.segment_key,
            short_id(&job.prompt, tick)
        );
        let url = format!("dryrun://{storage_key}");
        if job.persist {
            project.videos.push(VideoRecord {
                uuid: Some(uuid.clone()),
                segment_id: Some(RawId::Text(job.segment_key.clone())),
                image_id: job.image_id.clone(),
                files: vec![VideoFile {
                    storage_key: Some(storage_key.clone()),
                    url: Some(url.clone()),
                }],
                art_style: Some(job.style.clone()),
            });
        }
        Ok(json!({
            "success": true,
            "uuid": uuid,
            "files": [{ "storageKey": storage_key, "url": url }],
        }))
    }
}

#[async_trait]
impl ProjectDataSource for DryrunStudio {
    async fn get_segmentations(&self, project_id: &str) -> Result<ApiEnvelope<SegmentationRecord>> {
        self.pause().await;
        Ok(self
            .lock()
            .fetch(project_id, |project| project.segmentations.clone()))
    }

    async fn get_images(&self, project_id: &str) -> Result<ApiEnvelope<ImageRecord>> {
        self.pause().await;
        Ok(self.lock().fetch(project_id, |project| project.images.clone()))
    }

    async fn get_videos(&self, project_id: &str) -> Result<ApiEnvelope<VideoRecord>> {
        self.pause().await;
        Ok(self.lock().fetch(project_id, |project| project.videos.clone()))
    }

    async fn set_primary_image(
        &self,
        project_id: &str,
        image_id: &str,
    ) -> Result<ApiEnvelope<ImageRecord>> {
        self.pause().await;
        let mut state = self.lock();
        let project = state.project_mut(project_id)?;
        let Some(segment) = project
            .images
            .iter()
            .find(|image| image.uuid.as_deref() == Some(image_id))
            .and_then(|image| image.segment_id.clone())
        else {
            return Ok(ApiEnvelope::failed(format!("unknown image {image_id}")));
        };
        let mut updated = Vec::new();
        for image in project
            .images
            .iter_mut()
            .filter(|image| image.segment_id.as_ref() == Some(&segment))
        {
            let primary = image.uuid.as_deref() == Some(image_id);
            image.is_primary = Some(primary);
            if primary {
                updated.push(image.clone());
            }
        }
        Ok(ApiEnvelope::ok(updated))
    }

    async fn create_project(
        &self,
        name: &str,
        description: &str,
    ) -> Result<ApiEnvelope<ProjectRecord>> {
        self.pause().await;
        let mut state = self.lock();
        state.next_project += 1;
        let record = ProjectRecord {
            id: state.next_project.to_string(),
            name: name.to_string(),
            description: description.to_string(),
        };
        state.projects.insert(
            record.id.clone(),
            StudioProject {
                record: record.clone(),
                segmentations: Vec::new(),
                images: Vec::new(),
                videos: Vec::new(),
            },
        );
        Ok(ApiEnvelope::ok(vec![record]))
    }

    async fn save_segmentation(
        &self,
        project_id: &str,
        script: &SelectedScript,
    ) -> Result<ApiEnvelope<SegmentationRecord>> {
        self.pause().await;
        let mut state = self.lock();
        let tick = state.tick();
        let project = state.project_mut(project_id)?;
        let record = SegmentationRecord {
            id: Some(RawId::Number(tick as i64)),
            segments: script.segments.clone(),
            art_style: Some(script.art_style.clone()),
        };
        project.segmentations = vec![record.clone()];
        tracing::debug!(project = %project.record.name, segments = record.segments.len(), "dryrun segmentation saved");
        Ok(ApiEnvelope::ok(vec![record]))
    }

    async fn save_video(
        &self,
        project_id: &str,
        video: &GeneratedVideo,
    ) -> Result<ApiEnvelope<VideoRecord>> {
        self.pause().await;
        let mut state = self.lock();
        let project = state.project_mut(project_id)?;
        let record = VideoRecord {
            uuid: Some(video.id.clone()),
            segment_id: Some(RawId::Text(video.segment_key.clone())),
            image_id: video.image_id.clone(),
            files: vec![VideoFile {
                storage_key: Some(video.storage_key.clone()),
                url: video.url.clone(),
            }],
            art_style: Some(video.art_style.clone()),
        };
        project.videos.push(record.clone());
        Ok(ApiEnvelope::ok(vec![record]))
    }
}
