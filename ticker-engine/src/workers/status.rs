use crate::config::store::write_atomic;
use chrono::Local;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::{path::PathBuf, sync::Arc};
use tracing::warn;

/// One worker's record in the status document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub status: String,
    pub last_update: String,
    pub error_message: Option<String>,
    /// Worker-specific counters, flattened into the record.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl WorkerStatus {
    pub fn new(status: impl Into<String>, error_message: Option<String>) -> Self {
        Self {
            status: status.into(),
            last_update: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            error_message,
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Shared `{"workers": {name: record}}` document, rewritten atomically on every update.
///
/// Writes go through one lock so concurrent workers never interleave a read-modify-write.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    path: Option<PathBuf>,
    workers: Arc<Mutex<Map<String, Value>>>,
}

impl StatusBoard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            workers: Arc::default(),
        }
    }

    /// A board that keeps records in memory only.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn update(&self, worker: &str, status: WorkerStatus) {
        let mut record = serde_json::to_value(status).unwrap_or_else(|_| json!({}));
        if let Value::Object(fields) = &mut record {
            fields.insert("timestamp".to_string(), json!(chrono::Utc::now().timestamp()));
        }

        let mut workers = self.workers.lock();
        workers.insert(worker.to_string(), record);

        let Some(path) = &self.path else {
            return;
        };
        let document = json!({ "workers": Value::Object(workers.clone()) });
        if let Err(error) = write_atomic(path, &document) {
            warn!(?error, path = %path.display(), "failed to write status document");
        }
    }

    pub fn get(&self, worker: &str) -> Option<Value> {
        self.workers.lock().get(worker).cloned()
    }
}
