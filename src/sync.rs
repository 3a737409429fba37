//! Last-sync persistence
//!
//! Holds the most recent snapshot so a caller can show what was synced
//! without re-running an aggregation. A reader sees either the previous or
//! the new snapshot in full, never a mix.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::error::VitalsError;
use crate::types::{Snapshot, SyncSummary};

/// Storage for the most recent snapshot
pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &Snapshot) -> Result<(), VitalsError>;

    /// `Ok(None)` before the first successful save
    fn load(&self) -> Result<Option<Snapshot>, VitalsError>;
}

/// Digest of the stored snapshot, if any
pub fn last_sync_summary(store: &dyn SnapshotStore) -> Result<Option<SyncSummary>, VitalsError> {
    Ok(store.load()?.map(|s| s.summary()))
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    latest: RwLock<Option<Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, snapshot: &Snapshot) -> Result<(), VitalsError> {
        let mut latest = self
            .latest
            .write()
            .map_err(|_| VitalsError::StoreError("snapshot lock poisoned".to_string()))?;
        *latest = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>, VitalsError> {
        let latest = self
            .latest
            .read()
            .map_err(|_| VitalsError::StoreError("snapshot lock poisoned".to_string()))?;
        Ok(latest.clone())
    }
}

/// JSON file store.
///
/// Writes go to a sibling temp file which is then renamed over the target.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &Snapshot) -> Result<(), VitalsError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.tmp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), id = %snapshot.id, "Saved snapshot");
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>, VitalsError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&self.path)?;
        let snapshot = Snapshot::from_json(&json).map_err(|e| {
            VitalsError::StoreError(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(Some(snapshot))
    }
}
