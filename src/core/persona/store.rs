use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::{PersonaRecord, normalize_key};

#[derive(Debug, Error)]
pub enum PersonaStoreError {
    #[error("Failed to read persona directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Persona store does not support reloading")]
    ReloadUnsupported,
}

/// Read-only persona lookup injected into the resolver.
///
/// Implementations hand out owned snapshots so a reload never changes a
/// record that a call has already resolved.
pub trait PersonaStore: Send + Sync {
    /// Record for a routing key. Keys are matched case-insensitively.
    fn get(&self, key: &str) -> Option<PersonaRecord>;

    /// Number of stored personas.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reload from the backing storage, returning the new persona count.
    fn reload(&self) -> Result<usize, PersonaStoreError> {
        Err(PersonaStoreError::ReloadUnsupported)
    }
}

/// Fixed personas held in memory.
#[derive(Debug, Default)]
pub struct InMemoryPersonaStore {
    records: HashMap<String, PersonaRecord>,
}

impl InMemoryPersonaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<K, I>(records: I) -> Self
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, PersonaRecord)>,
    {
        Self {
            records: records
                .into_iter()
                .map(|(key, record)| (normalize_key(key.as_ref()), record))
                .collect(),
        }
    }
}

impl PersonaStore for InMemoryPersonaStore {
    fn get(&self, key: &str) -> Option<PersonaRecord> {
        self.records.get(&normalize_key(key)).cloned()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Personas loaded from `<dir>/<key>.json`.
///
/// The snapshot is swapped atomically on [`PersonaStore::reload`]. A missing
/// directory or an unreadable file is logged and skipped, never fatal.
#[derive(Debug)]
pub struct FilePersonaStore {
    dir: PathBuf,
    records: ArcSwap<HashMap<String, PersonaRecord>>,
}

impl FilePersonaStore {
    /// Load the directory once. Starts empty if it cannot be read.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let records = match load_dir(&dir) {
            Ok(records) => {
                tracing::info!(dir = %dir.display(), count = records.len(), "Loaded personas");
                records
            }
            Err(e) => {
                tracing::warn!("{}; continuing with default persona only", e);
                HashMap::new()
            }
        };

        Self {
            dir,
            records: ArcSwap::from_pointee(records),
        }
    }

}

impl PersonaStore for FilePersonaStore {
    fn get(&self, key: &str) -> Option<PersonaRecord> {
        self.records.load().get(&normalize_key(key)).cloned()
    }

    fn len(&self) -> usize {
        self.records.load().len()
    }

    fn reload(&self) -> Result<usize, PersonaStoreError> {
        let records = load_dir(&self.dir)?;
        let count = records.len();
        self.records.store(Arc::new(records));
        tracing::info!(dir = %self.dir.display(), count, "Reloaded personas");
        Ok(count)
    }
}

fn load_dir(dir: &Path) -> Result<HashMap<String, PersonaRecord>, PersonaStoreError> {
    let entries = std::fs::read_dir(dir).map_err(|source| PersonaStoreError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut records = HashMap::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(key) = path.file_stem().and_then(|stem| stem.to_str()).map(normalize_key) else {
            continue;
        };

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Skipping unreadable persona file: {}", e);
                continue;
            }
        };

        match serde_json::from_str::<PersonaRecord>(&contents) {
            Ok(record) => {
                records.insert(key, record);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "Skipping malformed persona file: {}", e);
            }
        }
    }

    Ok(records)
}
