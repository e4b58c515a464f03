//! Client-side orchestration for the concept → script → image → video
//! pipeline.
//!
//! The [`Pipeline`] drives a six-step workflow against a
//! [`GenerationBackend`] and a [`ProjectDataSource`], keeping a reconciled
//! per-segment view of the project's assets and a graph projection of it.

pub mod abort;
pub mod app_state;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod generation;
pub mod graph;
pub mod http;
pub mod notices;
pub mod pipeline;
pub mod previews;
pub mod project_source;
pub mod reconcile;
pub mod sanitize;
pub mod task_group;
pub mod tracker;
pub mod workflow;

pub use abort::AbortSignal;
pub use capabilities::{Capabilities, ExportOutcome, Host};
pub use config::EngineConfig;
pub use error::WorkflowError;
pub use generation::{DryrunStudio, GenerationBackend, GenerationFacade, HttpBackend};
pub use graph::Graph;
pub use pipeline::{BatchEstimate, BatchReport, Pipeline};
pub use project_source::{HttpProjectSource, ProjectDataSource};
pub use reconcile::ReconciledView;
pub use tracker::TaskKind;
pub use workflow::{Step, StepStatus, WorkflowState};
