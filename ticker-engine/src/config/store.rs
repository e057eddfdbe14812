use super::{Category, ConfigKey, TickerConfig};
use crate::error::ConfigError;
use serde_json::{Map, Value};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::{debug, info, warn};

/// Keys whose value changed in a reload, and the union of their categories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub keys: BTreeSet<ConfigKey>,
    pub categories: BTreeSet<Category>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    fn insert(&mut self, key: ConfigKey) {
        self.keys.insert(key);
        self.categories.extend(key.categories().iter().copied());
    }
}

/// File-backed configuration store with modification-time change detection.
///
/// The store owns the current [`TickerConfig`] snapshot. Reloading only overlays the keys
/// present in the document; absent keys keep their previous values and unknown keys are
/// ignored. A document that cannot be read, parsed or validated leaves the snapshot untouched.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    config: TickerConfig,
    modified: Option<SystemTime>,
}

impl ConfigStore {
    /// Open the store at `path`, loading whatever valid configuration is present.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_config(path, TickerConfig::default())
    }

    /// Open the store at `path` on top of an initial snapshot.
    pub fn with_config(path: impl Into<PathBuf>, config: TickerConfig) -> Self {
        let mut store = Self {
            path: path.into(),
            config,
            modified: None,
        };
        if let Some(changes) = store.poll() {
            info!(
                path = %store.path.display(),
                keys = changes.keys.len(),
                "loaded config"
            );
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> &TickerConfig {
        &self.config
    }

    /// Check the document's modification time and reload it if it changed.
    ///
    /// Returns `None` when nothing changed, including when the document is missing,
    /// unreadable or rejected.
    pub fn poll(&mut self) -> Option<ChangeSet> {
        let modified = match std::fs::metadata(&self.path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(error) => {
                debug!(path = %self.path.display(), %error, "config document unavailable");
                return None;
            }
        };
        if self.modified == Some(modified) {
            return None;
        }
        self.modified = Some(modified);

        let document = match read_document(&self.path) {
            Ok(document) => document,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "ignoring unreadable config document");
                return None;
            }
        };

        match self.apply(document) {
            Ok(changes) if changes.is_empty() => None,
            Ok(changes) => {
                info!(
                    keys = ?changes.keys.iter().map(ConfigKey::name).collect::<Vec<_>>(),
                    categories = ?changes.categories,
                    "config reloaded"
                );
                Some(changes)
            }
            Err(error) => {
                warn!(path = %self.path.display(), %error, "rejected config document, keeping previous");
                None
            }
        }
    }

    /// Overlay the known keys of `document` onto the current snapshot.
    ///
    /// The swap is all-or-nothing: on error the previous snapshot stays in force.
    pub fn apply(&mut self, document: Value) -> Result<ChangeSet, ConfigError> {
        let Value::Object(overlay) = document else {
            return Err(ConfigError::NotAnObject);
        };

        let previous = self.snapshot_map()?;
        let mut merged = previous.clone();
        for (name, value) in overlay {
            if ConfigKey::from_name(&name).is_some() {
                merged.insert(name, value);
            } else {
                debug!(key = %name, "ignoring unknown config key");
            }
        }

        let candidate = TickerConfig::from_value(Value::Object(merged))?;
        let current = serde_json::to_value(&candidate)?;

        let mut changes = ChangeSet::default();
        for key in ConfigKey::ALL {
            if previous.get(key.name()) != current.get(key.name()) {
                changes.insert(*key);
            }
        }

        self.config = candidate;
        Ok(changes)
    }

    /// Editor contract: merge `patch` into the document on disk, validate the result and
    /// write it atomically. A malformed patch is rejected and nothing is written.
    pub fn write_patch(&mut self, patch: Value) -> Result<ChangeSet, ConfigError> {
        let Value::Object(patch) = patch else {
            return Err(ConfigError::NotAnObject);
        };

        // Keep whatever else is in the file, including keys this engine does not know.
        let mut document = match read_document(&self.path) {
            Ok(Value::Object(document)) => document,
            Ok(_) | Err(_) => self.snapshot_map()?,
        };
        document.extend(patch);

        let mut candidate = self.snapshot_map()?;
        for (name, value) in &document {
            if ConfigKey::from_name(name).is_some() {
                candidate.insert(name.clone(), value.clone());
            }
        }
        TickerConfig::from_value(Value::Object(candidate))?;

        write_atomic(&self.path, &Value::Object(document.clone()))?;
        let changes = self.apply(Value::Object(document))?;
        self.modified = std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok();

        info!(keys = changes.keys.len(), "config patch written");
        Ok(changes)
    }

    fn snapshot_map(&self) -> Result<Map<String, Value>, ConfigError> {
        match serde_json::to_value(&self.config)? {
            Value::Object(map) => Ok(map),
            _ => Err(ConfigError::NotAnObject),
        }
    }
}

fn read_document(path: &Path) -> Result<Value, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    Ok(serde_json::from_str(&raw)?)
}

/// Write `value` as pretty JSON via a temporary sibling file and rename.
pub(crate) fn write_atomic(path: &Path, value: &Value) -> Result<(), std::io::Error> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let encoded = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    std::fs::write(&tmp, encoded)?;
    std::fs::rename(&tmp, path)
}
