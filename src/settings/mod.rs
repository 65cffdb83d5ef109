//! Durable settings collaborator.
//!
//! A flat string key→value store used to persist, per repository, the
//! last-checked timestamp and the last known-valid commit hash. No schema
//! beyond flat string keys.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{error, warn};

/// Durable string key→value store.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// Settings persisted as a flat JSON object on disk.
///
/// Writes go through immediately; a write failure is logged and the
/// in-memory value kept, so a transient disk problem degrades to
/// "re-check sooner than necessary" instead of an error.
pub struct JsonFileSettings {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonFileSettings {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(map) => map,
                Err(error) => {
                    warn!(path = %path.display(), %error, "settings file unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn persist(&self, entries: &HashMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            if let Err(io_error) = std::fs::create_dir_all(parent) {
                error!(path = %self.path.display(), %io_error, "could not create settings directory");
                return;
            }
        }
        match serde_json::to_string_pretty(entries) {
            Ok(text) => {
                if let Err(io_error) = std::fs::write(&self.path, text) {
                    error!(path = %self.path.display(), %io_error, "could not persist settings");
                }
            }
            Err(error) => error!(%error, "could not serialize settings"),
        }
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().expect("settings lock").get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().expect("settings lock");
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries);
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemorySettings {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().expect("settings lock").get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .expect("settings lock")
            .insert(key.to_string(), value.to_string());
    }
}
