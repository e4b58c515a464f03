use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use frameloom_contracts::store::KeyValueStore;
use serde_json::Value;

const SELECTED_PROJECT_KEY: &str = "project.selected";
const VIDEO_MAP_KEY: &str = "project.video_map";

/// Session state that survives restarts: the last selected project and
/// the last known `display key -> storage key` video map.
///
/// Loaded once on init and written back on change. The cached map only
/// seeds the view until the first reconcile replaces it.
pub struct AppState {
    store: Arc<dyn KeyValueStore>,
    project_id: Option<String>,
    video_map: BTreeMap<String, String>,
}

impl AppState {
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let project_id = store
            .get(SELECTED_PROJECT_KEY)
            .and_then(|value| value.as_str().map(str::to_string))
            .filter(|value| !value.trim().is_empty());
        let video_map = store
            .get(VIDEO_MAP_KEY)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        Self {
            store,
            project_id,
            video_map,
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn video_map(&self) -> &BTreeMap<String, String> {
        &self.video_map
    }

    /// Returns true when the selection changed. Switching projects drops
    /// the cached video map, which belonged to the previous project.
    pub fn select_project(&mut self, project_id: Option<&str>) -> Result<bool> {
        let project_id = project_id
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        if project_id == self.project_id {
            return Ok(false);
        }
        self.project_id = project_id;
        match &self.project_id {
            Some(id) => self
                .store
                .set(SELECTED_PROJECT_KEY, Value::String(id.clone()))?,
            None => self.store.remove(SELECTED_PROJECT_KEY)?,
        }
        self.set_video_map(BTreeMap::new())?;
        Ok(true)
    }

    pub fn set_video_map(&mut self, video_map: BTreeMap<String, String>) -> Result<()> {
        if video_map == self.video_map {
            return Ok(());
        }
        self.store
            .set(VIDEO_MAP_KEY, serde_json::to_value(&video_map)?)?;
        self.video_map = video_map;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use frameloom_contracts::store::{JsonFileStore, MemoryStore};
    use serde_json::json;

    use super::*;

    #[test]
    fn state_round_trips_through_the_store() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let mut state = AppState::load(store.clone());
        assert_eq!(state.project_id(), None);

        assert!(state.select_project(Some("7"))?);
        assert!(!state.select_project(Some(" 7 "))?);
        state.set_video_map(BTreeMap::from([("1".to_string(), "videos/1.mp4".to_string())]))?;

        let reloaded = AppState::load(store.clone());
        assert_eq!(reloaded.project_id(), Some("7"));
        assert_eq!(reloaded.video_map().get("1").map(String::as_str), Some("videos/1.mp4"));
        Ok(())
    }

    #[test]
    fn switching_projects_clears_the_cached_map() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let mut state = AppState::load(store.clone());
        state.select_project(Some("1"))?;
        state.set_video_map(BTreeMap::from([("2".to_string(), "v.mp4".to_string())]))?;
        state.select_project(None)?;
        assert!(state.video_map().is_empty());
        assert_eq!(store.snapshot().get(SELECTED_PROJECT_KEY), None);
        assert_eq!(store.snapshot().get(VIDEO_MAP_KEY), Some(&json!({})));
        Ok(())
    }

    #[test]
    fn file_backed_state_survives_a_restart() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        {
            let mut state = AppState::load(Arc::new(JsonFileStore::new(&path)));
            state.select_project(Some("42"))?;
        }
        let state = AppState::load(Arc::new(JsonFileStore::new(&path)));
        assert_eq!(state.project_id(), Some("42"));
        Ok(())
    }

    #[test]
    fn malformed_cache_entries_are_ignored() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        store.set(VIDEO_MAP_KEY, json!(["not", "a", "map"]))?;
        store.set(SELECTED_PROJECT_KEY, json!(12))?;
        let state = AppState::load(store);
        assert!(state.video_map().is_empty());
        assert_eq!(state.project_id(), None);
        Ok(())
    }
}
