use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;

use serde_json::{Map, Value};

const DEFAULT_CREDIT_TABLE_JSON: &str = include_str!("../resources/default_credits.json");

/// Per-unit credit prices keyed by category (`text`, `image`, `video`)
/// and model name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostTable {
    rows: BTreeMap<String, BTreeMap<String, Map<String, Value>>>,
}

impl CostTable {
    /// Built-in table merged with `~/.frameloom/credit_overrides.json`.
    pub fn load() -> Self {
        let mut table = Self::from_json(DEFAULT_CREDIT_TABLE_JSON);
        if let Some(path) = override_path() {
            if let Ok(raw) = fs::read_to_string(&path) {
                tracing::debug!(path = %path.display(), "merging credit overrides");
                table.merge_json(&raw);
            }
        }
        table
    }

    pub fn builtin() -> Self {
        Self::from_json(DEFAULT_CREDIT_TABLE_JSON)
    }

    pub fn from_json(raw: &str) -> Self {
        let mut table = Self::default();
        table.merge_json(raw);
        table
    }

    /// Overlay rows from `raw`; fields of existing rows are replaced one by one.
    pub fn merge_json(&mut self, raw: &str) {
        let Ok(payload) = serde_json::from_str::<Value>(raw) else {
            tracing::warn!("ignoring credit table that is not valid JSON");
            return;
        };
        let Some(categories) = payload.as_object() else {
            return;
        };
        for (category, models) in categories {
            let Some(models) = models.as_object() else {
                continue;
            };
            let slot = self.rows.entry(category.to_ascii_lowercase()).or_default();
            for (model, row) in models {
                let Some(row) = row.as_object() else {
                    continue;
                };
                let entry = slot.entry(model.to_string()).or_default();
                for (field, value) in row {
                    entry.insert(field.to_string(), value.clone());
                }
            }
        }
    }

    /// Credits for one unit of `model` in `category`. Edits use
    /// `edit_credits` when the row has it. Unknown rows cost nothing.
    pub fn cost_of(&self, category: &str, model: &str, is_edit: bool) -> u64 {
        let category = category.trim().to_ascii_lowercase();
        let Some(models) = self.rows.get(&category) else {
            tracing::warn!(category = %category, model, "no credit table for category");
            return 0;
        };
        let Some(row) = models.get(model.trim()) else {
            tracing::warn!(category = %category, model, "no credit price for model");
            return 0;
        };
        let edit = if is_edit {
            row.get("edit_credits").and_then(value_as_credits)
        } else {
            None
        };
        edit.or_else(|| row.get("credits").and_then(value_as_credits))
            .unwrap_or(0)
    }

    pub fn models(&self, category: &str) -> Vec<String> {
        self.rows
            .get(&category.to_ascii_lowercase())
            .map(|models| models.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn value_as_credits(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|v| *v >= 0.0).map(|v| v.ceil() as u64)),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn override_path() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(".frameloom").join("credit_overrides.json"))
}
