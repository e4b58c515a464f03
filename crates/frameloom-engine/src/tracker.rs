use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Image,
    Video,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Generating,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationTask {
    pub entity_key: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub error: Option<String>,
    /// 1-based position inside the batch that launched the task.
    pub ordinal: usize,
    pub total: usize,
}

/// Keyed generation state, one entry per segment/image entity.
///
/// Methods take `&self` so tasks settling in any order can report in
/// while the batch that launched them is still being awaited.
#[derive(Debug, Default)]
pub struct TaskTracker {
    tasks: Mutex<BTreeMap<String, GenerationTask>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a standalone task. Returns false while `entity_key` is
    /// already generating.
    pub fn start(&self, entity_key: &str, kind: TaskKind) -> bool {
        self.start_in_batch(entity_key, kind, 1, 1)
    }

    pub fn start_in_batch(
        &self,
        entity_key: &str,
        kind: TaskKind,
        ordinal: usize,
        total: usize,
    ) -> bool {
        let mut tasks = self.lock();
        if let Some(existing) = tasks.get(entity_key) {
            if existing.status == TaskStatus::Generating {
                tracing::debug!(entity_key, %kind, "generation already in flight");
                return false;
            }
        }
        tasks.insert(
            entity_key.to_string(),
            GenerationTask {
                entity_key: entity_key.to_string(),
                kind,
                status: TaskStatus::Generating,
                error: None,
                ordinal,
                total,
            },
        );
        true
    }

    pub fn complete(&self, entity_key: &str) {
        if let Some(task) = self.lock().get_mut(entity_key) {
            task.status = TaskStatus::Completed;
            task.error = None;
        }
    }

    pub fn fail(&self, entity_key: &str, error: impl Into<String>) {
        if let Some(task) = self.lock().get_mut(entity_key) {
            task.status = TaskStatus::Error;
            task.error = Some(error.into());
        }
    }

    /// Unknown keys have never been started and report as pending.
    pub fn status(&self, entity_key: &str) -> TaskStatus {
        self.lock()
            .get(entity_key)
            .map(|task| task.status)
            .unwrap_or(TaskStatus::Pending)
    }

    pub fn get(&self, entity_key: &str) -> Option<GenerationTask> {
        self.lock().get(entity_key).cloned()
    }

    pub fn snapshot(&self) -> Vec<GenerationTask> {
        self.lock().values().cloned().collect()
    }

    pub fn in_flight(&self) -> usize {
        self.lock()
            .values()
            .filter(|task| task.status == TaskStatus::Generating)
            .count()
    }

    /// Drop finished entries; in-flight tasks are kept.
    pub fn clear_settled(&self) {
        self.lock()
            .retain(|_, task| task.status == TaskStatus::Generating);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, GenerationTask>> {
        // A poisoned map still holds consistent per-key entries.
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
