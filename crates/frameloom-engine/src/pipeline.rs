//! The pipeline orchestrator.
//!
//! [`Pipeline`] owns the workflow state machine, the reconciled project
//! view and everything the six steps need to run: a generation facade, a
//! project data source, host capabilities and the persisted session. Every
//! step action checks its preconditions before any network call, marks the
//! step loading, and on failure reverts it and posts a notice.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use frameloom_contracts::events::{EventPayload, EventWriter};
use frameloom_contracts::models::{ModelSelection, ModelSelector, CAP_IMAGE, CAP_TEXT, CAP_VIDEO};
use frameloom_contracts::pricing::CostTable;
use frameloom_contracts::records::{
    Concept, GeneratedImage, GeneratedVideo, ProjectRecord, ScriptChoice, ScriptOptions, Segment,
    SelectedScript,
};
use frameloom_contracts::store::KeyValueStore;
use serde::Serialize;
use serde_json::{json, Value};

use crate::abort::AbortSignal;
use crate::app_state::AppState;
use crate::capabilities::{Capabilities, ExportOutcome, TimelineManifest};
use crate::config::EngineConfig;
use crate::error::WorkflowError;
use crate::generation::{GenerationBackend, GenerationFacade, ImageJob, VideoJob};
use crate::graph::{self, Graph, GraphInput};
use crate::notices::NoticeBoard;
use crate::previews::PreviewVideos;
use crate::project_source::ProjectDataSource;
use crate::reconcile::{fetch_and_reconcile, ReconciledView};
use crate::sanitize::sanitize_prompt;
use crate::task_group::TaskGroup;
use crate::tracker::{TaskKind, TaskTracker};
use crate::workflow::{Step, WorkflowState};

const PARTIAL_FAILURE_NOTICE: &str = "Some requests failed";

/// Outcome of one image or video batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub kind: TaskKind,
    pub model: String,
    pub fallback_reason: Option<String>,
    pub launched: usize,
    /// Entity keys that produced an asset.
    pub succeeded: Vec<String>,
    /// `(entity key, error)` per failed request.
    pub failed: Vec<(String, String)>,
    /// Entity keys left alone because they were already generating.
    pub skipped: Vec<String>,
}

impl BatchReport {
    fn new(kind: TaskKind, selection: &ModelSelection) -> Self {
        Self {
            kind,
            model: selection.model.name.clone(),
            fallback_reason: selection.fallback_reason.clone(),
            launched: 0,
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn any_failed(&self) -> bool {
        !self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEstimate {
    pub kind: TaskKind,
    pub model: String,
    pub eligible: usize,
    pub credits_each: u64,
    pub total_credits: u64,
}

#[derive(Debug, Clone, Default)]
struct ModelDefaults {
    text: Option<String>,
    image: Option<String>,
    video: Option<String>,
}

pub struct Pipeline {
    facade: GenerationFacade,
    source: Arc<dyn ProjectDataSource>,
    capabilities: Capabilities,
    app: AppState,
    workflow: WorkflowState,
    tracker: TaskTracker,
    view: ReconciledView,
    previews: PreviewVideos,
    notices: NoticeBoard,
    selector: ModelSelector,
    costs: CostTable,
    events: Option<EventWriter>,
    abort: AbortSignal,
    defaults: ModelDefaults,
    refresh_after_batch: bool,
}

impl Pipeline {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        source: Arc<dyn ProjectDataSource>,
        capabilities: Capabilities,
        store: Arc<dyn KeyValueStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            facade: GenerationFacade::new(backend),
            source,
            capabilities,
            app: AppState::load(store),
            workflow: WorkflowState::new(),
            tracker: TaskTracker::new(),
            view: ReconciledView::default(),
            previews: PreviewVideos::new(),
            notices: NoticeBoard::new(config.chrono_notice_ttl()),
            selector: ModelSelector::default(),
            costs: CostTable::load(),
            events: None,
            abort: AbortSignal::new(),
            defaults: ModelDefaults {
                text: config.text_model.clone(),
                image: config.image_model.clone(),
                video: config.video_model.clone(),
            },
            refresh_after_batch: config.refresh_after_batch,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_costs(mut self, costs: CostTable) -> Self {
        self.costs = costs;
        self
    }

    pub fn with_selector(mut self, selector: ModelSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn project_id(&self) -> Option<&str> {
        self.app.project_id()
    }

    pub fn workflow(&self) -> &WorkflowState {
        &self.workflow
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn view(&self) -> &ReconciledView {
        &self.view
    }

    pub fn previews(&self) -> &PreviewVideos {
        &self.previews
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn notices_mut(&mut self) -> &mut NoticeBoard {
        &mut self.notices
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn backend_name(&self) -> &str {
        self.facade.backend_name()
    }

    /// Video map cached by the previous session, usable before the first
    /// refresh lands.
    pub fn cached_video_map(&self) -> &BTreeMap<String, String> {
        self.app.video_map()
    }

    /// Handle to the signal every in-flight request checks. Aborting it
    /// cancels the current work; see [`Pipeline::cancel_all`] to re-arm.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Abort whatever is in flight and arm a fresh signal for later work.
    pub fn cancel_all(&mut self) {
        self.abort.abort();
        self.abort = AbortSignal::new();
        tracing::info!("in-flight requests cancelled");
    }

    // ---- projects ----

    pub async fn create_project(
        &mut self,
        name: &str,
        description: &str,
    ) -> Result<ProjectRecord, WorkflowError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(self.fail(None, WorkflowError::EmptyProjectName));
        }
        let created = self
            .source
            .create_project(name, description.trim())
            .await
            .and_then(|envelope| envelope.into_data("project creation"))
            .and_then(|records| {
                records
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("project creation returned no record"))
            });
        let record = match created {
            Ok(record) => record,
            Err(cause) => {
                return Err(self.fail(None, WorkflowError::upstream("project creation failed", cause)))
            }
        };
        self.emit("project_created", json!({ "project_id": record.id, "name": record.name }));
        self.open_project(&record.id).await?;
        Ok(record)
    }

    /// Select `project_id` and load its view. Switching projects drops all
    /// per-project session state and cancels work still in flight.
    pub async fn open_project(&mut self, project_id: &str) -> Result<(), WorkflowError> {
        let previous = self.app.project_id().map(str::to_string);
        if let Err(err) = self.app.select_project(Some(project_id)) {
            tracing::warn!(error = %err, "failed to persist project selection");
        }
        if self.app.project_id().map(str::to_string) != previous {
            self.reset_session();
        }
        self.emit("project_opened", json!({ "project_id": project_id.trim() }));
        self.refresh().await
    }

    pub fn close_project(&mut self) {
        if let Err(err) = self.app.select_project(None) {
            tracing::warn!(error = %err, "failed to persist project selection");
        }
        self.reset_session();
    }

    /// Refetch the project and install the reconciled view. On failure the
    /// previous view stays in place.
    pub async fn refresh(&mut self) -> Result<(), WorkflowError> {
        let project_id = self.require_project()?;
        match fetch_and_reconcile(self.source.as_ref(), &project_id).await {
            Ok(view) => {
                self.install_view(view);
                Ok(())
            }
            Err(cause) => Err(self.fail(None, WorkflowError::Reconcile(cause))),
        }
    }

    // ---- steps 0..3 ----

    pub async fn run_concept_writer(
        &mut self,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<Vec<Concept>, WorkflowError> {
        let prompt = sanitize_prompt(prompt);
        if prompt.is_empty() {
            return Err(self.fail(None, WorkflowError::EmptyPrompt));
        }
        let selection = self.select_model(model, TaskSlot::Text)?;
        self.begin(Step::ConceptWriter)?;

        let facade = self.facade.clone();
        let abort = self.abort.clone();
        let outcome = async {
            let web_info = facade.web_info(&prompt, &abort).await?;
            facade
                .generate_concepts(&prompt, &web_info, &selection.model.name, &abort)
                .await
        }
        .await;

        match outcome {
            Ok(concepts) => {
                self.workflow.set_concepts(concepts.clone());
                self.emit(
                    "concepts_generated",
                    json!({ "count": concepts.len(), "model": selection.model.name }),
                );
                Ok(concepts)
            }
            Err(cause) => Err(self.fail(
                Some(Step::ConceptWriter),
                WorkflowError::upstream("concept generation failed", cause),
            )),
        }
    }

    pub fn select_concept(&mut self, index: usize) -> Result<Concept, WorkflowError> {
        match self.workflow.select_concept(index).cloned() {
            Ok(concept) => {
                self.emit("concept_selected", json!({ "index": index, "title": concept.title }));
                Ok(concept)
            }
            Err(err) => Err(self.fail(None, err)),
        }
    }

    /// Draft both script options concurrently. Both must succeed.
    pub async fn run_script_generation(
        &mut self,
        model: Option<&str>,
    ) -> Result<ScriptOptions, WorkflowError> {
        if let Err(err) = self.workflow.precondition(Step::ScriptGeneration) {
            return Err(self.fail(None, err));
        }
        let selection = self.select_model(model, TaskSlot::Text)?;
        let Some(concept) = self.workflow.selected_concept().cloned() else {
            return Err(self.fail(None, WorkflowError::MissingConcept));
        };
        self.begin(Step::ScriptGeneration)?;

        let facade = self.facade.clone();
        let abort = self.abort.clone();
        let model_name = selection.model.name.as_str();
        let outcome = tokio::try_join!(
            facade.generate_script(&concept, model_name, ScriptChoice::A, &abort),
            facade.generate_script(&concept, model_name, ScriptChoice::B, &abort),
        );

        match outcome {
            Ok((option_a, option_b)) => {
                let options = ScriptOptions { option_a, option_b };
                if let Err(err) = self.workflow.set_scripts(options.clone()) {
                    return Err(self.fail(Some(Step::ScriptGeneration), err));
                }
                self.emit(
                    "scripts_generated",
                    json!({
                        "segments_a": options.option_a.segments.len(),
                        "segments_b": options.option_b.segments.len(),
                    }),
                );
                Ok(options)
            }
            Err(cause) => Err(self.fail(
                Some(Step::ScriptGeneration),
                WorkflowError::upstream("script generation failed", cause),
            )),
        }
    }

    /// Lock in a script draft and save it as the project's segmentation.
    /// A failed save is reported but does not undo the selection.
    pub async fn select_script(
        &mut self,
        choice: ScriptChoice,
    ) -> Result<SelectedScript, WorkflowError> {
        let script = match self.workflow.select_script(choice).cloned() {
            Ok(script) => script,
            Err(err) => return Err(self.fail(None, err)),
        };
        self.view.segments = script.segments.clone();
        self.view.art_style = Some(script.art_style.clone());
        self.emit(
            "script_selected",
            json!({ "choice": choice, "segments": script.segments.len() }),
        );

        if let Some(project_id) = self.app.project_id().map(str::to_string) {
            let saved = self
                .source
                .save_segmentation(&project_id, &script)
                .await
                .and_then(|envelope| envelope.into_data("segmentation save"));
            if let Err(err) = saved {
                tracing::warn!(error = %format!("{err:#}"), "segmentation not saved");
                self.notices.error(format!("Could not save the script: {err:#}"));
            }
        }
        Ok(script)
    }

    pub fn go_to_step(&mut self, step: Step) -> Result<(), WorkflowError> {
        match self.workflow.go_to(step) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(None, err)),
        }
    }

    /// Forget concepts and scripts; the project and its assets stay.
    pub fn reset_workflow(&mut self) {
        self.workflow.reset();
        self.workflow.note_images(self.view.image_count());
        self.workflow.note_videos(self.view.video_count());
    }

    // ---- batches ----

    /// Credits a batch of `kind` would cost right now.
    pub fn estimate_batch(
        &self,
        kind: TaskKind,
        model: Option<&str>,
    ) -> Result<BatchEstimate, WorkflowError> {
        let (slot, category, eligible) = match kind {
            TaskKind::Image => (TaskSlot::Image, "image", self.image_candidates().len()),
            TaskKind::Video => (TaskSlot::Video, "video", self.video_candidates().len()),
        };
        let selection = self.resolve_model(model, slot)?;
        let credits_each = self
            .costs
            .cost_of(category, selection.model.credit_key(), false);
        Ok(BatchEstimate {
            kind,
            model: selection.model.name,
            eligible,
            credits_each,
            total_credits: credits_each * eligible as u64,
        })
    }

    /// One image per segment with a visual prompt, all launched at once.
    pub async fn run_image_generation(
        &mut self,
        model: Option<&str>,
    ) -> Result<BatchReport, WorkflowError> {
        let project_id = self.require_project()?;
        if let Err(err) = self.workflow.precondition(Step::ImageGeneration) {
            return Err(self.fail(None, err));
        }
        let selection = self.select_model(model, TaskSlot::Image)?;
        let candidates = self.image_candidates();
        if candidates.is_empty() {
            return Err(self.fail(None, WorkflowError::NothingToGenerate(TaskKind::Image)));
        }
        let art_style = self.active_art_style();
        self.begin(Step::ImageGeneration)?;

        let mut report = BatchReport::new(TaskKind::Image, &selection);
        let facade = self.facade.clone();
        let abort = self.abort.clone();
        let tracker = &self.tracker;
        let total = candidates.len();
        let mut group = TaskGroup::new();
        for (idx, segment) in candidates.into_iter().enumerate() {
            if !tracker.start_in_batch(&segment.id, TaskKind::Image, idx + 1, total) {
                report.skipped.push(segment.id);
                continue;
            }
            let job = ImageJob {
                prompt: segment.visual,
                style: art_style.clone(),
                entity_key: segment.id.clone(),
                project_id: project_id.clone(),
                model: selection.model.name.clone(),
            };
            let facade = &facade;
            let abort = &abort;
            group.spawn(segment.id, async move {
                let result = facade.generate_image(&job, abort).await;
                match &result {
                    Ok(_) => tracker.complete(&job.entity_key),
                    Err(err) => tracker.fail(&job.entity_key, format!("{err:#}")),
                }
                result.map(|generated| (job, generated))
            });
        }
        report.launched = group.len();
        tracing::info!(launched = report.launched, skipped = report.skipped.len(), model = %report.model, "image batch started");
        let (successes, failures) = group.join_settled().await.into_parts();

        for (key, (job, generated)) in successes {
            let id = generated
                .field("uuid")
                .or_else(|| generated.field("id"))
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!("{}-{}", frameloom_contracts::ids::prefixed(&key), Utc::now().timestamp_millis())
                });
            let url = generated.url().map(str::to_string);
            self.view.insert_image(GeneratedImage {
                id,
                segment_key: key.clone(),
                url,
                storage_key: generated.storage_key,
                visual_prompt: job.prompt,
                art_style: job.style,
                is_primary: false,
                created_order: 0,
            });
            report.succeeded.push(key);
        }
        self.finish_batch(Step::ImageGeneration, report, failures).await
    }

    /// One video per segment that has a primary image, animated from it.
    pub async fn run_video_generation(
        &mut self,
        model: Option<&str>,
    ) -> Result<BatchReport, WorkflowError> {
        let project_id = self.require_project()?;
        if let Err(err) = self.workflow.precondition(Step::VideoGeneration) {
            return Err(self.fail(None, err));
        }
        let selection = self.select_model(model, TaskSlot::Video)?;
        let candidates = self.video_candidates();
        if candidates.is_empty() {
            return Err(self.fail(None, WorkflowError::NothingToGenerate(TaskKind::Video)));
        }
        let art_style = self.active_art_style();
        self.begin(Step::VideoGeneration)?;

        let mut report = BatchReport::new(TaskKind::Video, &selection);
        let facade = self.facade.clone();
        let abort = self.abort.clone();
        let tracker = &self.tracker;
        let total = candidates.len();
        let mut group = TaskGroup::new();
        for (idx, (segment, image)) in candidates.into_iter().enumerate() {
            let job = VideoJob {
                prompt: motion_prompt(&segment).to_string(),
                style: art_style.clone(),
                image_ref: image.storage_key.clone(),
                image_id: Some(image.id.clone()),
                segment_key: segment.id.clone(),
                project_id: project_id.clone(),
                model: selection.model.name.clone(),
                persist: true,
            };
            let key = job.entity_key();
            if !tracker.start_in_batch(&key, TaskKind::Video, idx + 1, total) {
                report.skipped.push(key);
                continue;
            }
            let facade = &facade;
            let abort = &abort;
            group.spawn(key, async move {
                let result = facade.generate_video(&job, abort).await;
                match &result {
                    Ok(_) => tracker.complete(&job.entity_key()),
                    Err(err) => tracker.fail(&job.entity_key(), format!("{err:#}")),
                }
                result.map(|generated| (job, generated))
            });
        }
        report.launched = group.len();
        tracing::info!(launched = report.launched, skipped = report.skipped.len(), model = %report.model, "video batch started");
        let (successes, failures) = group.join_settled().await.into_parts();

        for (key, (job, generated)) in successes {
            let video = video_from_result(&job, &key, generated);
            self.view.insert_video(video);
            report.succeeded.push(key);
        }
        self.finish_batch(Step::VideoGeneration, report, failures).await
    }

    // ---- per-asset actions ----

    pub async fn set_primary_image(
        &mut self,
        segment_key: &str,
        image_id: &str,
    ) -> Result<(), WorkflowError> {
        let project_id = self.require_project()?;
        if self.view.image(segment_key, image_id).is_none() {
            return Err(self.fail(None, WorkflowError::UnknownImage(image_id.to_string())));
        }
        let saved = self
            .source
            .set_primary_image(&project_id, image_id)
            .await
            .and_then(|envelope| envelope.into_data("primary image update"));
        if let Err(cause) = saved {
            return Err(self.fail(None, WorkflowError::upstream("setting the primary image failed", cause)));
        }
        self.view.promote_image(segment_key, image_id);
        self.emit(
            "primary_image_set",
            json!({ "segment": segment_key, "image_id": image_id }),
        );
        self.refresh_quietly().await;
        Ok(())
    }

    /// Generate a video for one image without persisting it. The result is
    /// kept as a preview until saved or discarded.
    pub async fn preview_video(
        &mut self,
        segment_key: &str,
        image_id: &str,
        model: Option<&str>,
    ) -> Result<GeneratedVideo, WorkflowError> {
        let project_id = self.require_project()?;
        let Some(image) = self.view.image(segment_key, image_id).cloned() else {
            return Err(self.fail(None, WorkflowError::UnknownImage(image_id.to_string())));
        };
        let Some(segment) = self.find_segment(segment_key) else {
            return Err(self.fail(None, WorkflowError::UnknownSegment(segment_key.to_string())));
        };
        let selection = self.select_model(model, TaskSlot::Video)?;
        let job = VideoJob {
            prompt: motion_prompt(&segment).to_string(),
            style: self.active_art_style(),
            image_ref: image.storage_key.clone(),
            image_id: Some(image.id.clone()),
            segment_key: segment.id.clone(),
            project_id,
            model: selection.model.name.clone(),
            persist: false,
        };
        let key = job.entity_key();
        if !self.tracker.start(&key, TaskKind::Video) {
            return Err(self.fail(None, WorkflowError::InFlight(key)));
        }

        let abort = self.abort.clone();
        match self.facade.generate_video(&job, &abort).await {
            Ok(generated) => {
                self.tracker.complete(&key);
                let video = video_from_result(&job, &key, generated);
                self.previews.insert(video.clone());
                self.emit("preview_generated", json!({ "key": key, "video_id": video.id }));
                Ok(video)
            }
            Err(cause) => {
                self.tracker.fail(&key, format!("{cause:#}"));
                Err(self.fail(None, WorkflowError::upstream("preview video failed", cause)))
            }
        }
    }

    /// Persist a preview so it becomes the canonical video for its image.
    pub async fn save_preview(
        &mut self,
        segment_key: &str,
        image_id: &str,
    ) -> Result<GeneratedVideo, WorkflowError> {
        let project_id = self.require_project()?;
        let Some(video) = self.previews.get(segment_key, image_id).cloned() else {
            return Err(self.fail(
                None,
                WorkflowError::UnknownPreview(frameloom_contracts::ids::video_key(segment_key, Some(image_id))),
            ));
        };
        let saved = self
            .source
            .save_video(&project_id, &video)
            .await
            .and_then(|envelope| envelope.into_data("video save"));
        if let Err(cause) = saved {
            return Err(self.fail(None, WorkflowError::upstream("saving the preview failed", cause)));
        }
        self.previews.take(segment_key, image_id);
        self.view.insert_video(video.clone());
        self.workflow.note_videos(self.view.video_count());
        self.emit("preview_saved", json!({ "key": video.key(), "video_id": video.id }));
        self.refresh_quietly().await;
        Ok(video)
    }

    pub fn discard_previews(&mut self) {
        self.previews.clear();
    }

    // ---- projections ----

    /// Canonical videos with unsaved previews filling the gaps.
    pub fn display_videos(&self) -> BTreeMap<String, GeneratedVideo> {
        self.view.display_videos(&self.previews)
    }

    pub fn graph(&self) -> Graph {
        graph::project(&GraphInput::from_view(&self.view, &self.previews))
    }

    pub fn export_timeline(&mut self) -> Result<ExportOutcome, WorkflowError> {
        let project_id = self.require_project()?;
        let manifest = TimelineManifest::from_view(&project_id, &self.view);
        match self.capabilities.exporter.export(&manifest) {
            Ok(outcome) => {
                self.emit(
                    "timeline_exported",
                    json!({ "project_id": project_id, "clips": manifest.clips.len() }),
                );
                Ok(outcome)
            }
            Err(cause) => Err(self.fail(None, WorkflowError::upstream("timeline export failed", cause))),
        }
    }

    // ---- internals ----

    fn reset_session(&mut self) {
        self.cancel_all();
        self.workflow.reset();
        self.tracker.clear();
        self.previews.clear();
        self.view = ReconciledView::default();
    }

    fn install_view(&mut self, view: ReconciledView) {
        self.view = view;
        if !self.view.segments.is_empty() {
            let art_style = self.view.art_style.clone().unwrap_or_default();
            self.workflow
                .restore_script(self.view.segments.clone(), art_style);
        }
        self.workflow.note_images(self.view.image_count());
        self.workflow.note_videos(self.view.video_count());
        self.tracker.clear_settled();
        if let Err(err) = self.app.set_video_map(self.view.video_map()) {
            tracing::warn!(error = %err, "failed to cache the video map");
        }
    }

    async fn refresh_quietly(&mut self) {
        if !self.refresh_after_batch {
            return;
        }
        if let Err(err) = self.refresh().await {
            tracing::warn!(error = %err, "refresh after update failed");
        }
    }

    /// Settle a batch whose successes are already in the view. Fails only
    /// when every launched request failed.
    async fn finish_batch(
        &mut self,
        step: Step,
        mut report: BatchReport,
        failures: Vec<(String, anyhow::Error)>,
    ) -> Result<BatchReport, WorkflowError> {
        report.failed = failures
            .iter()
            .map(|(key, err)| (key.clone(), format!("{err:#}")))
            .collect();

        if report.launched == 0 {
            self.workflow.revert(step);
            self.notices.info(format!("{} generation already in progress", report.kind));
            return Ok(report);
        }
        if report.succeeded.is_empty() {
            let cause = failures
                .into_iter()
                .next()
                .map(|(_, err)| err)
                .unwrap_or_else(|| anyhow!("no request succeeded"));
            let context = match report.kind {
                TaskKind::Image => "image generation failed",
                TaskKind::Video => "video generation failed",
            };
            return Err(self.fail(Some(step), WorkflowError::upstream(context, cause)));
        }
        if report.any_failed() {
            self.notices.error(PARTIAL_FAILURE_NOTICE);
        }

        self.refresh_quietly().await;
        self.workflow.note_images(self.view.image_count());
        self.workflow.note_videos(self.view.video_count());
        let (produced, next) = match report.kind {
            TaskKind::Image => (self.view.image_count() > 0, Some(Step::VideoGeneration)),
            TaskKind::Video => (self.view.video_count() > 0, None),
        };
        if !produced || self.workflow.complete(step, next).is_err() {
            self.workflow.revert(step);
        }
        tracing::info!(
            kind = %report.kind,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "batch settled"
        );
        self.emit(
            "batch_settled",
            json!({
                "kind": report.kind,
                "model": report.model,
                "launched": report.launched,
                "succeeded": report.succeeded.len(),
                "failed": report.failed.len(),
            }),
        );
        Ok(report)
    }

    fn begin(&mut self, step: Step) -> Result<(), WorkflowError> {
        match self.workflow.begin(step) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(None, err)),
        }
    }

    /// Report a failed action: revert `step` if it was loading, post an
    /// error notice and log it.
    fn fail(&mut self, step: Option<Step>, err: WorkflowError) -> WorkflowError {
        if let Some(step) = step {
            self.workflow.revert(step);
        }
        let message = err.to_string();
        if err.is_precondition() {
            tracing::debug!(error = %message, "action refused");
        } else {
            tracing::warn!(error = %message, "action failed");
        }
        self.notices.error(message.clone());
        self.emit(
            "action_failed",
            json!({ "step": step.map(Step::index), "error": message }),
        );
        err
    }

    fn require_project(&mut self) -> Result<String, WorkflowError> {
        match self.app.project_id().map(str::to_string) {
            Some(project_id) => Ok(project_id),
            None => Err(self.fail(None, WorkflowError::NoProject)),
        }
    }

    fn resolve_model(
        &self,
        requested: Option<&str>,
        slot: TaskSlot,
    ) -> Result<ModelSelection, WorkflowError> {
        let (default, capability) = match slot {
            TaskSlot::Text => (self.defaults.text.as_deref(), CAP_TEXT),
            TaskSlot::Image => (self.defaults.image.as_deref(), CAP_IMAGE),
            TaskSlot::Video => (self.defaults.video.as_deref(), CAP_VIDEO),
        };
        self.selector
            .select(requested.or(default), capability)
            .map_err(WorkflowError::NoModel)
    }

    fn select_model(
        &mut self,
        requested: Option<&str>,
        slot: TaskSlot,
    ) -> Result<ModelSelection, WorkflowError> {
        match self.resolve_model(requested, slot) {
            Ok(selection) => {
                if let (Some(reason), Some(_)) = (&selection.fallback_reason, &selection.requested) {
                    self.notices
                        .info(format!("{reason} Using {}.", selection.model.name));
                }
                Ok(selection)
            }
            Err(err) => Err(self.fail(None, err)),
        }
    }

    fn active_segments(&self) -> Vec<Segment> {
        match self.workflow.selected_script() {
            Some(script) => script.segments.clone(),
            None => self.view.segments.clone(),
        }
    }

    fn active_art_style(&self) -> String {
        self.workflow
            .selected_script()
            .map(|script| script.art_style.clone())
            .or_else(|| self.view.art_style.clone())
            .unwrap_or_default()
    }

    fn find_segment(&self, segment_key: &str) -> Option<Segment> {
        self.active_segments()
            .into_iter()
            .find(|segment| segment.id == segment_key)
    }

    fn image_candidates(&self) -> Vec<Segment> {
        self.active_segments()
            .into_iter()
            .filter(Segment::has_visual)
            .collect()
    }

    fn video_candidates(&self) -> Vec<(Segment, GeneratedImage)> {
        self.active_segments()
            .into_iter()
            .filter(|segment| !motion_prompt(segment).is_empty())
            .filter_map(|segment| {
                let image = self.view.primary_image(&segment.id)?.clone();
                Some((segment, image))
            })
            .collect()
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        let payload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        events.emit_quiet(event_type, payload);
    }
}

#[derive(Debug, Clone, Copy)]
enum TaskSlot {
    Text,
    Image,
    Video,
}

/// Animation direction when the segment has one, else its visual.
fn motion_prompt(segment: &Segment) -> &str {
    if segment.animation.trim().is_empty() {
        segment.visual.trim()
    } else {
        segment.animation.trim()
    }
}

fn video_from_result(
    job: &VideoJob,
    key: &str,
    generated: crate::generation::GenerationResult,
) -> GeneratedVideo {
    let id = generated
        .field("uuid")
        .or_else(|| generated.field("id"))
        .map(str::to_string)
        .unwrap_or_else(|| key.to_string());
    let url = generated.url().map(str::to_string);
    GeneratedVideo {
        id,
        segment_key: job.segment_key.clone(),
        image_id: job.image_id.clone(),
        url,
        storage_key: generated.storage_key,
        art_style: job.style.clone(),
    }
}
