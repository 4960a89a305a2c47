//! Cross-run persistence of observed property values
//!
//! The store remembers, per resource reference, the last value seen or set
//! for each property plus when the resource was last checked and synced.
//! It feeds audit events and corrective-change detection.

use crate::error::{Error, Result};
use crate::property::PropertyValues;
use crate::types::Value;
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// Store Structures
// ============================================================================

/// Everything the store knows about one resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Last recorded value per property
    #[serde(default)]
    pub values: BTreeMap<String, Value>,

    /// Last time the resource was evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<DateTime<Utc>>,

    /// Last time a change was made to the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced: Option<DateTime<Utc>>,
}

/// The persisted document, keyed by resource reference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
}

// ============================================================================
// Backends
// ============================================================================

/// Where the store document lives
pub trait StoreBackend: fmt::Debug {
    /// Read the document; unreadable data yields an empty document
    fn load(&mut self) -> StoreData;

    /// Write the document
    fn save(&mut self, data: &StoreData) -> Result<()>;

    /// Human-readable location for messages
    fn location(&self) -> String;
}

/// JSON file on disk
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document and leave the file untouched
    ///
    /// A missing file reads as an empty document. Unreadable or corrupt data
    /// is an error, and unlike [`StoreBackend::load`] the file stays in place.
    pub fn read(&self) -> Result<StoreData> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoreData::default()),
            Err(source) => {
                return Err(Error::Store {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// Move a corrupt store out of the way so the next save starts clean
    fn quarantine(&self) {
        let bad = sibling(&self.path, ".bad");
        match fs::rename(&self.path, &bad) {
            Ok(()) => warn!("Moved corrupt state store to {}", bad.display()),
            Err(e) => error!(
                "Could not move corrupt state store {} aside: {e}; remove it manually",
                self.path.display()
            ),
        }
    }
}

impl StoreBackend for FileBackend {
    fn load(&mut self) -> StoreData {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "State store {} does not exist, starting empty",
                    self.path.display()
                );
                return StoreData::default();
            }
            Err(e) => {
                warn!(
                    "Could not read state store {}: {e}; starting empty",
                    self.path.display()
                );
                self.quarantine();
                return StoreData::default();
            }
        };

        match serde_json::from_str::<StoreData>(&content) {
            Ok(data) => {
                debug!("Loaded state store from {}", self.path.display());
                data
            }
            Err(e) => {
                warn!(
                    "State store {} is corrupt ({e}); starting empty",
                    self.path.display()
                );
                self.quarantine();
                StoreData::default()
            }
        }
    }

    fn save(&mut self, data: &StoreData) -> Result<()> {
        let store_error = |source| Error::Store {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(store_error)?;
        }

        let content = serde_json::to_string_pretty(data)?;
        let tmp = sibling(&self.path, ".tmp");
        fs::write(&tmp, content).map_err(store_error)?;
        fs::rename(&tmp, &self.path).map_err(store_error)?;

        debug!("Saved state store to {}", self.path.display());
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory store, used for tests and for runs that keep no history
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: StoreData,
    saves: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that already holds data, as if saved by an earlier run
    pub fn seeded(data: StoreData) -> Self {
        Self { data, saves: 0 }
    }

    /// Number of times the document was saved
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl StoreBackend for MemoryBackend {
    fn load(&mut self) -> StoreData {
        self.data.clone()
    }

    fn save(&mut self, data: &StoreData) -> Result<()> {
        self.data = data.clone();
        self.saves += 1;
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

// ============================================================================
// Persistence
// ============================================================================

/// Loaded store document plus the backend it came from
#[derive(Debug)]
pub struct Persistence<B: StoreBackend> {
    backend: B,
    data: StoreData,
}

impl Persistence<FileBackend> {
    /// Store backed by a JSON file
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(FileBackend::new(path))
    }
}

impl Persistence<MemoryBackend> {
    /// Store that lives only as long as this value
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }
}

impl<B: StoreBackend> Persistence<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            data: StoreData::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Replace the in-memory document with what the backend holds
    pub fn load(&mut self) {
        self.data = self.backend.load();
    }

    /// Write the in-memory document to the backend
    pub fn save(&mut self) -> Result<()> {
        self.backend.save(&self.data)
    }

    pub fn data(&self) -> &StoreData {
        &self.data
    }

    pub fn location(&self) -> String {
        self.backend.location()
    }

    pub fn record(&self, reference: &str) -> Option<&ResourceRecord> {
        self.data.resources.get(reference)
    }

    /// Every recorded value of a resource
    pub fn values(&self, reference: &str) -> PropertyValues {
        self.record(reference)
            .map(|record| record.values.clone())
            .unwrap_or_default()
    }

    pub fn get_system_value(&self, reference: &str, property: &str) -> Option<&Value> {
        self.record(reference)?.values.get(property)
    }

    pub fn set_system_value(&mut self, reference: &str, property: &str, value: Value) {
        self.record_mut(reference)
            .values
            .insert(property.to_string(), value);
    }

    pub fn mark_checked(&mut self, reference: &str) {
        self.record_mut(reference).checked = Some(Utc::now());
    }

    pub fn mark_synced(&mut self, reference: &str) {
        self.record_mut(reference).synced = Some(Utc::now());
    }

    /// Forget resources that are no longer managed
    pub fn prune<S: AsRef<str>>(&mut self, live: &[S]) {
        let before = self.data.resources.len();
        self.data
            .resources
            .retain(|reference, _| live.iter().any(|l| l.as_ref() == reference));
        let pruned = before - self.data.resources.len();
        if pruned > 0 {
            debug!("Pruned {pruned} stale record(s) from the state store");
        }
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.data = StoreData::default();
    }

    fn record_mut(&mut self, reference: &str) -> &mut ResourceRecord {
        self.data
            .resources
            .entry(reference.to_string())
            .or_default()
    }
}
