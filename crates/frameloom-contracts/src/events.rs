use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only JSONL activity log for a pipeline session.
///
/// Each line carries `type`, `session_id` and `ts`; payload keys are
/// merged last and win over the defaults.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        event.extend(payload);

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        writeln!(file, "{line}")?;

        Ok(Value::Object(event))
    }

    /// Emit and log instead of failing; the activity log is advisory.
    pub fn emit_quiet(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.emit(event_type, payload) {
            tracing::warn!(event_type, error = %err, "failed to append activity event");
        }
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_one_compact_line_per_event() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("activity.jsonl");
        let writer = EventWriter::new(&path, "session-1");

        let mut payload = EventPayload::new();
        payload.insert("step".to_string(), Value::from(4));
        let emitted = writer.emit("step_done", payload)?;
        writer.emit("batch_settled", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0])?;
        assert_eq!(first, emitted);
        assert_eq!(first["type"], Value::from("step_done"));
        assert_eq!(first["session_id"], Value::from("session-1"));
        assert_eq!(first["step"], Value::from(4));
        DateTime::parse_from_rfc3339(first["ts"].as_str().unwrap_or(""))?;

        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(second["type"], Value::from("batch_settled"));
        Ok(())
    }

    #[test]
    fn payload_overrides_defaults() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("activity.jsonl"), "session-1");
        let mut payload = EventPayload::new();
        payload.insert("session_id".to_string(), Value::from("other"));
        let emitted = writer.emit("noted", payload)?;
        assert_eq!(emitted["session_id"], Value::from("other"));
        Ok(())
    }
}
