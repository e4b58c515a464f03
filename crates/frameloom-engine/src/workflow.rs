use std::fmt;

use frameloom_contracts::records::{Concept, ScriptChoice, ScriptOptions, Segment, SelectedScript};
use serde::Serialize;

use crate::error::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Step {
    ConceptWriter,
    ChooseConcept,
    ScriptGeneration,
    ChooseScript,
    ImageGeneration,
    VideoGeneration,
}

impl Step {
    pub const ALL: [Step; 6] = [
        Step::ConceptWriter,
        Step::ChooseConcept,
        Step::ScriptGeneration,
        Step::ChooseScript,
        Step::ImageGeneration,
        Step::VideoGeneration,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::ConceptWriter => "concept writer",
            Self::ChooseConcept => "choose concept",
            Self::ScriptGeneration => "script generation",
            Self::ChooseScript => "choose script",
            Self::ImageGeneration => "image generation",
            Self::VideoGeneration => "video generation",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({})", self.index(), self.label())
    }
}

/// There is deliberately no failed state: a failed run falls back to
/// `Pending` and the error travels through the notice board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Loading,
    Done,
}

/// The six-stage concept → script → image → video controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    current_step: Step,
    step_status: [StepStatus; 6],
    concepts: Option<Vec<Concept>>,
    selected_concept: Option<Concept>,
    scripts: Option<ScriptOptions>,
    selected_script: Option<SelectedScript>,
    image_count: usize,
    video_count: usize,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowState {
    pub fn new() -> Self {
        Self {
            current_step: Step::ConceptWriter,
            step_status: [StepStatus::Pending; 6],
            concepts: None,
            selected_concept: None,
            scripts: None,
            selected_script: None,
            image_count: 0,
            video_count: 0,
        }
    }

    /// `resetFlow`: back to a blank step 0.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn current_step(&self) -> Step {
        self.current_step
    }

    pub fn status(&self, step: Step) -> StepStatus {
        self.step_status[step.index()]
    }

    pub fn concepts(&self) -> Option<&[Concept]> {
        self.concepts.as_deref()
    }

    pub fn selected_concept(&self) -> Option<&Concept> {
        self.selected_concept.as_ref()
    }

    pub fn scripts(&self) -> Option<&ScriptOptions> {
        self.scripts.as_ref()
    }

    pub fn selected_script(&self) -> Option<&SelectedScript> {
        self.selected_script.as_ref()
    }

    /// What must already exist before `step` can run or count as done.
    pub fn precondition(&self, step: Step) -> Result<(), WorkflowError> {
        match step {
            Step::ConceptWriter => Ok(()),
            Step::ChooseConcept => match self.concepts.as_deref() {
                Some(concepts) if !concepts.is_empty() => Ok(()),
                _ => Err(WorkflowError::MissingConcepts),
            },
            Step::ScriptGeneration => self
                .selected_concept
                .as_ref()
                .map(|_| ())
                .ok_or(WorkflowError::MissingConcept),
            Step::ChooseScript => match self.selected_script.as_ref() {
                Some(script) if !script.segments.is_empty() => Ok(()),
                _ => Err(WorkflowError::MissingScript),
            },
            Step::ImageGeneration => self
                .selected_script
                .as_ref()
                .map(|_| ())
                .ok_or(WorkflowError::MissingScript),
            Step::VideoGeneration => {
                if self.image_count > 0 {
                    Ok(())
                } else {
                    Err(WorkflowError::NoImages)
                }
            }
        }
    }

    pub fn is_unlocked(&self, step: Step) -> bool {
        self.precondition(step).is_ok()
    }

    /// User navigation. Locked steps are rejected.
    pub fn go_to(&mut self, step: Step) -> Result<(), WorkflowError> {
        self.precondition(step)?;
        self.current_step = step;
        Ok(())
    }

    /// Enter `Loading` for a run. Re-running a finished step is allowed.
    pub fn begin(&mut self, step: Step) -> Result<(), WorkflowError> {
        self.precondition(step)?;
        self.step_status[step.index()] = StepStatus::Loading;
        tracing::debug!(%step, "step loading");
        Ok(())
    }

    /// Leave `Loading` after a failed run. Results kept from an earlier
    /// successful run still count, so the step lands on `Done` if they exist.
    pub fn revert(&mut self, step: Step) {
        let status = if self.has_results(step) {
            StepStatus::Done
        } else {
            StepStatus::Pending
        };
        self.step_status[step.index()] = status;
        tracing::debug!(%step, ?status, "step reverted");
    }

    /// Mark `step` done and move the cursor to `next`.
    pub fn complete(&mut self, step: Step, next: Option<Step>) -> Result<(), WorkflowError> {
        self.precondition(step)?;
        self.step_status[step.index()] = StepStatus::Done;
        if let Some(next) = next {
            self.current_step = next;
        }
        tracing::debug!(%step, current = %self.current_step, "step done");
        Ok(())
    }

    pub fn set_concepts(&mut self, concepts: Vec<Concept>) {
        self.concepts = Some(concepts);
        if self.has_results(Step::ConceptWriter) {
            self.step_status[Step::ConceptWriter.index()] = StepStatus::Done;
            self.current_step = Step::ChooseConcept;
        } else {
            self.step_status[Step::ConceptWriter.index()] = StepStatus::Pending;
        }
    }

    pub fn select_concept(&mut self, index: usize) -> Result<&Concept, WorkflowError> {
        let concept = self
            .concepts
            .as_deref()
            .ok_or(WorkflowError::MissingConcepts)?
            .get(index)
            .cloned()
            .ok_or(WorkflowError::UnknownConcept(index))?;
        self.selected_concept = Some(concept);
        self.step_status[Step::ChooseConcept.index()] = StepStatus::Done;
        self.current_step = Step::ScriptGeneration;
        Ok(self
            .selected_concept
            .as_ref()
            .ok_or(WorkflowError::MissingConcept)?)
    }

    pub fn set_scripts(&mut self, scripts: ScriptOptions) -> Result<(), WorkflowError> {
        self.precondition(Step::ScriptGeneration)?;
        self.scripts = Some(scripts);
        self.complete(Step::ScriptGeneration, Some(Step::ChooseScript))
    }

    pub fn select_script(&mut self, choice: ScriptChoice) -> Result<&SelectedScript, WorkflowError> {
        let concept = self
            .selected_concept
            .clone()
            .ok_or(WorkflowError::MissingConcept)?;
        let draft = self
            .scripts
            .as_ref()
            .ok_or(WorkflowError::MissingScripts)?
            .get(choice)
            .clone();
        if draft.segments.is_empty() {
            return Err(WorkflowError::EmptyScript);
        }
        self.install_script(SelectedScript {
            segments: draft.segments,
            art_style: draft.art_style,
            concept,
        });
        self.current_step = Step::ImageGeneration;
        self.selected_script
            .as_ref()
            .ok_or(WorkflowError::MissingScript)
    }

    /// Adopt a script found on the server when nothing is selected locally.
    /// A fresh session jumps straight to image generation.
    pub fn restore_script(&mut self, segments: Vec<Segment>, art_style: String) -> bool {
        if self.selected_script.is_some() || segments.is_empty() {
            return false;
        }
        if self.current_step == Step::ConceptWriter {
            self.current_step = Step::ImageGeneration;
        }
        let concept = self.selected_concept.clone().unwrap_or_else(|| Concept {
            title: "Restored script".to_string(),
            logline: String::new(),
            tone: String::new(),
        });
        self.install_script(SelectedScript {
            segments,
            art_style,
            concept,
        });
        true
    }

    /// Derived completion: step 4 counts as done once any image exists.
    pub fn note_images(&mut self, count: usize) {
        self.image_count = count;
        self.derive(Step::ImageGeneration);
    }

    pub fn note_videos(&mut self, count: usize) {
        self.video_count = count;
        self.derive(Step::VideoGeneration);
    }

    pub fn image_count(&self) -> usize {
        self.image_count
    }

    pub fn video_count(&self) -> usize {
        self.video_count
    }

    fn install_script(&mut self, script: SelectedScript) {
        self.selected_script = Some(script);
        self.step_status[Step::ChooseScript.index()] = StepStatus::Done;
    }

    fn derive(&mut self, step: Step) {
        let slot = &mut self.step_status[step.index()];
        if *slot == StepStatus::Loading {
            return;
        }
        let done = match step {
            Step::ImageGeneration => self.image_count > 0 && self.selected_script.is_some(),
            Step::VideoGeneration => self.video_count > 0 && self.image_count > 0,
            _ => return,
        };
        *slot = if done {
            StepStatus::Done
        } else {
            StepStatus::Pending
        };
    }

    fn has_results(&self, step: Step) -> bool {
        match step {
            Step::ConceptWriter => self.concepts.as_ref().is_some_and(|c| !c.is_empty()),
            Step::ChooseConcept => self.selected_concept.is_some(),
            Step::ScriptGeneration => self.scripts.is_some() && self.selected_concept.is_some(),
            Step::ChooseScript => self
                .selected_script
                .as_ref()
                .is_some_and(|script| !script.segments.is_empty()),
            Step::ImageGeneration => self.image_count > 0 && self.selected_script.is_some(),
            Step::VideoGeneration => self.video_count > 0 && self.image_count > 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use frameloom_contracts::records::ScriptDraft;

    use super::*;

    fn concept(title: &str) -> Concept {
        Concept {
            title: title.to_string(),
            logline: String::new(),
            tone: String::new(),
        }
    }

    fn draft(count: usize) -> ScriptDraft {
        ScriptDraft {
            segments: (1..=count)
                .map(|idx| Segment {
                    id: idx.to_string(),
                    visual: format!("shot {idx}"),
                    narration: String::new(),
                    animation: String::new(),
                })
                .collect(),
            art_style: "watercolor".to_string(),
        }
    }

    fn assert_invariants(state: &WorkflowState) {
        if state.selected_concept().is_some() {
            assert_eq!(state.status(Step::ChooseConcept), StepStatus::Done);
        }
        if state
            .selected_script()
            .is_some_and(|script| !script.segments.is_empty())
        {
            assert_eq!(state.status(Step::ChooseScript), StepStatus::Done);
        }
        for step in Step::ALL {
            if state.status(step) == StepStatus::Done {
                assert!(state.is_unlocked(step), "{step} done while locked");
            }
        }
    }

    #[test]
    fn fresh_state_only_unlocks_the_concept_writer() {
        let state = WorkflowState::new();
        assert_eq!(state.current_step(), Step::ConceptWriter);
        let unlocked: Vec<Step> = Step::ALL
            .into_iter()
            .filter(|step| state.is_unlocked(*step))
            .collect();
        assert_eq!(unlocked, vec![Step::ConceptWriter]);
    }

    #[test]
    fn selections_force_done_and_advance() -> Result<(), WorkflowError> {
        let mut state = WorkflowState::new();
        state.begin(Step::ConceptWriter)?;
        state.set_concepts(vec![concept("a"), concept("b")]);
        assert_eq!(state.status(Step::ConceptWriter), StepStatus::Done);
        assert_eq!(state.current_step(), Step::ChooseConcept);
        assert_invariants(&state);

        state.select_concept(1)?;
        assert_eq!(state.current_step(), Step::ScriptGeneration);
        assert_eq!(state.selected_concept().map(|c| c.title.as_str()), Some("b"));
        assert_invariants(&state);

        state.begin(Step::ScriptGeneration)?;
        state.set_scripts(ScriptOptions {
            option_a: draft(5),
            option_b: draft(3),
        })?;
        assert_eq!(state.current_step(), Step::ChooseScript);

        let script = state.select_script(ScriptChoice::B)?;
        assert_eq!(script.segments.len(), 3);
        assert_eq!(state.status(Step::ChooseScript), StepStatus::Done);
        assert_eq!(state.current_step(), Step::ImageGeneration);
        assert_invariants(&state);
        Ok(())
    }

    #[test]
    fn steps_refuse_to_begin_without_their_inputs() {
        let mut state = WorkflowState::new();
        assert!(matches!(
            state.begin(Step::ScriptGeneration),
            Err(WorkflowError::MissingConcept)
        ));
        assert!(matches!(
            state.begin(Step::VideoGeneration),
            Err(WorkflowError::NoImages)
        ));
        assert!(matches!(
            state.select_concept(0),
            Err(WorkflowError::MissingConcepts)
        ));
        assert_eq!(state.status(Step::ScriptGeneration), StepStatus::Pending);
    }

    #[test]
    fn failed_first_run_reverts_to_pending() -> Result<(), WorkflowError> {
        let mut state = WorkflowState::new();
        state.begin(Step::ConceptWriter)?;
        assert_eq!(state.status(Step::ConceptWriter), StepStatus::Loading);
        state.revert(Step::ConceptWriter);
        assert_eq!(state.status(Step::ConceptWriter), StepStatus::Pending);
        assert_eq!(state.current_step(), Step::ConceptWriter);
        Ok(())
    }

    #[test]
    fn failed_redo_keeps_earlier_results_done() -> Result<(), WorkflowError> {
        let mut state = WorkflowState::new();
        state.set_concepts(vec![concept("a")]);
        state.begin(Step::ConceptWriter)?;
        state.revert(Step::ConceptWriter);
        assert_eq!(state.status(Step::ConceptWriter), StepStatus::Done);
        assert_eq!(state.concepts().map(<[Concept]>::len), Some(1));
        Ok(())
    }

    #[test]
    fn image_step_completes_as_soon_as_any_image_exists() -> Result<(), WorkflowError> {
        let mut state = WorkflowState::new();
        state.set_concepts(vec![concept("a")]);
        state.select_concept(0)?;
        state.set_scripts(ScriptOptions {
            option_a: draft(2),
            option_b: draft(2),
        })?;
        state.select_script(ScriptChoice::A)?;
        state.begin(Step::ImageGeneration)?;
        state.note_images(1);
        assert_eq!(state.status(Step::ImageGeneration), StepStatus::Loading);
        state.complete(Step::ImageGeneration, Some(Step::VideoGeneration))?;
        assert_eq!(state.status(Step::ImageGeneration), StepStatus::Done);
        assert!(state.is_unlocked(Step::VideoGeneration));

        state.note_images(0);
        assert_eq!(state.status(Step::ImageGeneration), StepStatus::Pending);
        assert!(!state.is_unlocked(Step::VideoGeneration));
        Ok(())
    }

    #[test]
    fn restore_script_only_fills_an_empty_selection() {
        let mut state = WorkflowState::new();
        assert!(!state.restore_script(Vec::new(), String::new()));
        assert!(state.restore_script(draft(2).segments, "ink".to_string()));
        assert_eq!(state.status(Step::ChooseScript), StepStatus::Done);
        assert_eq!(state.current_step(), Step::ImageGeneration);
        assert!(!state.restore_script(draft(4).segments, "ink".to_string()));
        assert_eq!(state.selected_script().map(|s| s.segments.len()), Some(2));
        assert_invariants(&state);
    }

    #[test]
    fn go_to_respects_locks_and_reset_clears_everything() -> Result<(), WorkflowError> {
        let mut state = WorkflowState::new();
        assert!(state.go_to(Step::ChooseConcept).is_err());
        state.set_concepts(vec![concept("a")]);
        state.go_to(Step::ConceptWriter)?;
        assert_eq!(state.current_step(), Step::ConceptWriter);
        state.go_to(Step::ChooseConcept)?;
        state.reset();
        assert_eq!(state, WorkflowState::new());
        Ok(())
    }

    #[test]
    fn step_indices_round_trip() {
        for (idx, step) in Step::ALL.into_iter().enumerate() {
            assert_eq!(step.index(), idx);
            assert_eq!(Step::from_index(idx), Some(step));
        }
        assert_eq!(Step::from_index(6), None);
        assert_eq!(Step::ImageGeneration.to_string(), "step 4 (image generation)");
    }
}
