//! Checkpoint persistence for window operators.
//!
//! A checkpoint is a set of named operator snapshots (the bytes produced by
//! [`WindowOperator::snapshot`](crate::operator::WindowOperator::snapshot))
//! plus [`CheckpointMetadata`]. The partitioned runner writes one snapshot per
//! partition, named `partition_<index>`.

use crate::time::Timestamp;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

const METADATA_FILE: &str = "metadata.json";
const SNAPSHOT_EXTENSION: &str = "bin";

/// Error type for checkpoint operations.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// I/O or filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Checkpoint not found.
    #[error("checkpoint not found: {0}")]
    NotFound(u64),
    /// Other error.
    #[error("checkpoint error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Serialization(e.to_string())
    }
}

/// Identifier of a checkpoint, increasing with each checkpoint taken.
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize,
)]
pub struct CheckpointId(pub u64);

impl CheckpointId {
    /// Creates a new checkpoint id from a raw value.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the id following this one.
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Metadata for a checkpoint.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointMetadata {
    /// Checkpoint identifier.
    pub id: CheckpointId,
    /// Name of the operator the snapshots belong to.
    pub operator: String,
    /// Event time up to which input was consumed, if the caller tracks one.
    pub position: Option<Timestamp>,
    /// Wall-clock time the checkpoint was taken.
    pub created_at: DateTime<Utc>,
}

impl CheckpointMetadata {
    /// Creates metadata stamped with the current time.
    pub fn new(id: CheckpointId, operator: impl Into<String>) -> Self {
        Self {
            id,
            operator: operator.into(),
            position: None,
            created_at: Utc::now(),
        }
    }

    /// Sets the event-time position.
    pub fn with_position(mut self, position: Timestamp) -> Self {
        self.position = Some(position);
        self
    }
}

/// Trait for checkpoint storage backends.
pub trait CheckpointStorage: Send + Sync {
    /// Saves a checkpoint with the given metadata and named snapshots.
    fn save(
        &self,
        metadata: &CheckpointMetadata,
        snapshots: &HashMap<String, Vec<u8>>,
    ) -> Result<(), CheckpointError>;

    /// Loads a checkpoint by id. Returns metadata and named snapshots.
    fn load(
        &self,
        id: CheckpointId,
    ) -> Result<(CheckpointMetadata, HashMap<String, Vec<u8>>), CheckpointError>;

    /// Lists available checkpoint ids, ascending.
    fn list(&self) -> Result<Vec<CheckpointId>, CheckpointError>;

    /// Returns the most recent checkpoint id, if any.
    fn latest(&self) -> Result<Option<CheckpointId>, CheckpointError> {
        Ok(self.list()?.into_iter().max())
    }
}

/// File-based checkpoint storage.
///
/// Each checkpoint is stored as a subdirectory `<base>/<id>/` containing
/// `metadata.json` and one `<name>.bin` file per snapshot. Names are
/// sanitized to alphanumerics, `_` and `-`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStorage {
    base_path: PathBuf,
}

impl FileCheckpointStorage {
    /// Creates a new file checkpoint storage at the given path.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Returns the base directory.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn checkpoint_dir(&self, id: CheckpointId) -> PathBuf {
        self.base_path.join(id.as_u64().to_string())
    }
}

fn snapshot_file_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.{}", safe, SNAPSHOT_EXTENSION)
}

impl CheckpointStorage for FileCheckpointStorage {
    fn save(
        &self,
        metadata: &CheckpointMetadata,
        snapshots: &HashMap<String, Vec<u8>>,
    ) -> Result<(), CheckpointError> {
        let dir = self.checkpoint_dir(metadata.id);
        std::fs::create_dir_all(&dir)?;

        for (name, data) in snapshots {
            std::fs::write(dir.join(snapshot_file_name(name)), data)?;
        }

        // metadata last: a directory without it is an incomplete checkpoint
        let json = serde_json::to_string_pretty(metadata)?;
        std::fs::write(dir.join(METADATA_FILE), json)?;

        tracing::debug!(
            checkpoint = metadata.id.as_u64(),
            snapshots = snapshots.len(),
            path = %dir.display(),
            "saved checkpoint"
        );
        Ok(())
    }

    fn load(
        &self,
        id: CheckpointId,
    ) -> Result<(CheckpointMetadata, HashMap<String, Vec<u8>>), CheckpointError> {
        let dir = self.checkpoint_dir(id);
        let metadata_path = dir.join(METADATA_FILE);
        if !metadata_path.exists() {
            return Err(CheckpointError::NotFound(id.as_u64()));
        }

        let json = std::fs::read_to_string(&metadata_path)?;
        let metadata: CheckpointMetadata = serde_json::from_str(&json)?;

        let mut snapshots = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == SNAPSHOT_EXTENSION) {
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let name = name.to_string();
                snapshots.insert(name, std::fs::read(&path)?);
            }
        }

        Ok((metadata, snapshots))
    }

    fn list(&self) -> Result<Vec<CheckpointId>, CheckpointError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let complete = entry.path().join(METADATA_FILE).exists();
            if let Some(id) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) {
                if complete {
                    ids.push(CheckpointId::new(id));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

type StoredCheckpoint = (CheckpointMetadata, HashMap<String, Vec<u8>>);

/// Checkpoint storage kept in memory, for tests and single-process runs.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStorage {
    checkpoints: Mutex<BTreeMap<CheckpointId, StoredCheckpoint>>,
}

impl InMemoryCheckpointStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<MutexGuard<'_, BTreeMap<CheckpointId, StoredCheckpoint>>, CheckpointError> {
        self.checkpoints
            .lock()
            .map_err(|_| CheckpointError::Other("checkpoint storage lock poisoned".into()))
    }
}

impl CheckpointStorage for InMemoryCheckpointStorage {
    fn save(
        &self,
        metadata: &CheckpointMetadata,
        snapshots: &HashMap<String, Vec<u8>>,
    ) -> Result<(), CheckpointError> {
        self.lock()?
            .insert(metadata.id, (metadata.clone(), snapshots.clone()));
        Ok(())
    }

    fn load(
        &self,
        id: CheckpointId,
    ) -> Result<(CheckpointMetadata, HashMap<String, Vec<u8>>), CheckpointError> {
        self.lock()?
            .get(&id)
            .cloned()
            .ok_or(CheckpointError::NotFound(id.as_u64()))
    }

    fn list(&self) -> Result<Vec<CheckpointId>, CheckpointError> {
        Ok(self.lock()?.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_checkpoint_storage_save_load() {
        let tmp = TempDir::new().unwrap();
        let storage = FileCheckpointStorage::new(tmp.path());

        let metadata = CheckpointMetadata::new(CheckpointId::new(1), "clicks").with_position(100);
        let mut snapshots = HashMap::new();
        snapshots.insert("partition_0".to_string(), vec![1, 2, 3]);
        snapshots.insert("partition_1".to_string(), vec![4, 5, 6]);

        storage.save(&metadata, &snapshots).unwrap();
        let (loaded_meta, loaded_snapshots) = storage.load(CheckpointId::new(1)).unwrap();
        assert_eq!(loaded_meta, metadata);
        assert_eq!(loaded_meta.position, Some(100));
        assert_eq!(loaded_snapshots.get("partition_0"), Some(&vec![1, 2, 3]));
        assert_eq!(loaded_snapshots.get("partition_1"), Some(&vec![4, 5, 6]));

        assert_eq!(storage.list().unwrap(), vec![CheckpointId::new(1)]);
        assert_eq!(storage.latest().unwrap(), Some(CheckpointId::new(1)));
    }

    #[test]
    fn file_checkpoint_storage_missing_checkpoint() {
        let tmp = TempDir::new().unwrap();
        let storage = FileCheckpointStorage::new(tmp.path().join("nothing-here"));
        assert!(storage.list().unwrap().is_empty());
        assert!(matches!(
            storage.load(CheckpointId::new(7)),
            Err(CheckpointError::NotFound(7))
        ));
    }

    #[test]
    fn file_checkpoint_storage_ignores_incomplete_checkpoints() {
        let tmp = TempDir::new().unwrap();
        let storage = FileCheckpointStorage::new(tmp.path());
        std::fs::create_dir_all(tmp.path().join("3")).unwrap();

        let metadata = CheckpointMetadata::new(CheckpointId::new(2), "op");
        storage.save(&metadata, &HashMap::new()).unwrap();
        assert_eq!(storage.list().unwrap(), vec![CheckpointId::new(2)]);
    }

    #[test]
    fn snapshot_names_are_sanitized() {
        assert_eq!(snapshot_file_name("partition_0"), "partition_0.bin");
        assert_eq!(snapshot_file_name("a/b c"), "a_b_c.bin");
    }

    #[test]
    fn in_memory_storage_latest() {
        let storage = InMemoryCheckpointStorage::new();
        assert_eq!(storage.latest().unwrap(), None);

        let mut snapshots = HashMap::new();
        snapshots.insert("partition_0".to_string(), vec![9]);
        for id in [3, 1, 2] {
            storage
                .save(&CheckpointMetadata::new(CheckpointId::new(id), "op"), &snapshots)
                .unwrap();
        }
        assert_eq!(
            storage.list().unwrap(),
            vec![CheckpointId::new(1), CheckpointId::new(2), CheckpointId::new(3)]
        );
        assert_eq!(storage.latest().unwrap(), Some(CheckpointId::new(3)));
        let (meta, loaded) = storage.load(CheckpointId::new(2)).unwrap();
        assert_eq!(meta.id, CheckpointId::new(2));
        assert_eq!(loaded, snapshots);
        assert_eq!(CheckpointId::new(2).next(), CheckpointId::new(3));
    }
}
