use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only writer for a narration run's `events.jsonl`.
///
/// Every line is one compact object with `type`, `run_id`, `seq` and `ts` first, then the
/// caller's payload, which may override any of them. `seq` counts from 0 per writer and is
/// shared by clones, so interleaved progress from one run stays totally ordered.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    state: Mutex<WriterState>,
}

#[derive(Debug, Default)]
struct WriterState {
    seq: u64,
    file: Option<File>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                state: Mutex::new(WriterState::default()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;

        let mut event = Map::new();
        event.insert("type".to_string(), Value::from(event_type));
        event.insert("run_id".to_string(), Value::from(self.inner.run_id.as_str()));
        event.insert("seq".to_string(), Value::from(state.seq));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        event.extend(payload);

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        let file = match state.file.take() {
            Some(file) => file,
            None => self.open()?,
        };
        let file = state.file.insert(file);
        file.write_all(&line)
            .with_context(|| format!("failed appending to {}", self.inner.path.display()))?;
        state.seq += 1;

        Ok(Value::Object(event))
    }

    /// Emits a serializable record. Non-object values land under `"data"`.
    pub fn emit_record<T: Serialize>(&self, event_type: &str, record: &T) -> anyhow::Result<Value> {
        let payload = match serde_json::to_value(record)? {
            Value::Object(map) => map,
            other => EventPayload::from_iter([("data".to_string(), other)]),
        };
        self.emit(event_type, payload)
    }

    fn open(&self) -> anyhow::Result<File> {
        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .with_context(|| format!("failed opening {}", self.inner.path.display()))
    }
}

pub(crate) fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
