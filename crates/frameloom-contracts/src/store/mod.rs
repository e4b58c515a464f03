//! Key-value persistence port for best-effort local state.
//!
//! The engine never touches a global storage API; hosts hand it a
//! [`KeyValueStore`]. Values are JSON so callers can keep small maps.

mod file;

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::Value;

pub use file::JsonFileStore;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// In-process store, used by tests and browser-style hosts without disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values
            .lock()
            .map(|values| values.clone())
            .unwrap_or_default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.values
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.values
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{KeyValueStore, MemoryStore};

    #[test]
    fn memory_store_round_trip() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        assert_eq!(store.get("project"), None);
        store.set("project", json!("p-1"))?;
        assert_eq!(store.get("project"), Some(json!("p-1")));
        store.remove("project")?;
        assert!(store.snapshot().is_empty());
        Ok(())
    }
}
