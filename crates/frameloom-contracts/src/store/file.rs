use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};

use super::KeyValueStore;

/// JSON-file backed store. Writes only touch the keys this instance
/// changed, re-reading the file first so two writers sharing a path do
/// not clobber each other's keys.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

#[derive(Debug, Default)]
struct FileState {
    payload: Map<String, Value>,
    dirty: BTreeSet<String>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(FileState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, state: &mut FileState) -> anyhow::Result<()> {
        if state.dirty.is_empty() {
            return Ok(());
        }
        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        for key in &state.dirty {
            match state.payload.get(key) {
                Some(value) => {
                    on_disk.insert(key.clone(), value.clone());
                }
                None => {
                    on_disk.remove(key);
                }
            }
        }
        write_json_object(&self.path, &on_disk)?;
        state.payload = on_disk;
        state.dirty.clear();
        Ok(())
    }

    fn refresh(&self, state: &mut FileState) {
        state.payload = read_json_object(&self.path).unwrap_or_default();
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.state.lock().ok()?;
        self.refresh(&mut state);
        state.payload.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("file store lock poisoned"))?;
        self.refresh(&mut state);
        if state.payload.get(key) == Some(&value) {
            return Ok(());
        }
        state.payload.insert(key.to_string(), value);
        state.dirty.insert(key.to_string());
        self.flush(&mut state)
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("file store lock poisoned"))?;
        self.refresh(&mut state);
        if state.payload.remove(key).is_none() {
            return Ok(());
        }
        state.dirty.insert(key.to_string());
        self.flush(&mut state)
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}
