use thiserror::Error;

use crate::tracker::TaskKind;

/// Failures surfaced by the pipeline orchestrator.
///
/// Precondition variants are raised before any network call and leave
/// step state untouched; `Upstream` means a collaborator call failed and
/// the step was reverted; `Reconcile` means no refreshed view was installed.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("project name is empty")]
    EmptyProjectName,
    #[error("no project selected")]
    NoProject,
    #[error("no concepts generated yet")]
    MissingConcepts,
    #[error("no concept selected")]
    MissingConcept,
    #[error("no script drafts generated yet")]
    MissingScripts,
    #[error("no script selected")]
    MissingScript,
    #[error("selected script draft has no segments")]
    EmptyScript,
    #[error("no generated images yet")]
    NoImages,
    #[error("concept {0} does not exist")]
    UnknownConcept(usize),
    #[error("segment {0} is not part of the selected script")]
    UnknownSegment(String),
    #[error("image {0} is not part of the project")]
    UnknownImage(String),
    #[error("no preview video for {0}")]
    UnknownPreview(String),
    #[error("no segments are ready for {0} generation")]
    NothingToGenerate(TaskKind),
    #[error("{0} is already generating")]
    InFlight(String),
    #[error("{0}")]
    NoModel(String),
    #[error("{context}: {cause:#}")]
    Upstream {
        context: &'static str,
        cause: anyhow::Error,
    },
    #[error("project refresh failed: {0:#}")]
    Reconcile(anyhow::Error),
}

impl WorkflowError {
    pub fn upstream(context: &'static str, cause: anyhow::Error) -> Self {
        Self::Upstream { context, cause }
    }

    /// True for input-precondition failures that never reached the network.
    pub fn is_precondition(&self) -> bool {
        !matches!(
            self,
            Self::Upstream { .. } | Self::Reconcile(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::WorkflowError;
    use crate::tracker::TaskKind;

    #[test]
    fn messages_include_the_cause_chain() {
        let err = WorkflowError::upstream(
            "concept generation failed",
            anyhow!("HTTP 503").context("POST /api/concepts"),
        );
        assert_eq!(
            err.to_string(),
            "concept generation failed: POST /api/concepts: HTTP 503"
        );
        assert!(!err.is_precondition());
    }

    #[test]
    fn precondition_classification() {
        assert!(WorkflowError::EmptyPrompt.is_precondition());
        assert!(WorkflowError::NoProject.is_precondition());
        assert!(WorkflowError::UnknownConcept(4).is_precondition());
        assert!(WorkflowError::InFlight("1-seg-1".to_string()).is_precondition());
        assert_eq!(
            WorkflowError::NothingToGenerate(TaskKind::Video).to_string(),
            "no segments are ready for video generation"
        );
        assert!(!WorkflowError::Reconcile(anyhow!("images fetch failed")).is_precondition());
    }
}
