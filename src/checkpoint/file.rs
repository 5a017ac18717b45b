//! File-backed checkpoint store
//!
//! All partitions live in one JSON document. Every `set` rewrites the whole
//! document with an atomic write, so a crash leaves either the old or the new
//! checkpoint set on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::CheckpointStore;
use crate::error::{EventReplayError, Result, TransportError};
use crate::types::StreamPosition;
use crate::utils::atomic::atomic_write;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointDocument {
    version: u32,
    updated_at: DateTime<Utc>,
    positions: BTreeMap<String, StreamPosition>,
}

/// Checkpoints persisted to a JSON file
pub struct FileCheckpointStore {
    path: PathBuf,
    positions: Mutex<BTreeMap<String, StreamPosition>>,
}

impl FileCheckpointStore {
    /// Open the store at `path`, loading existing checkpoints if the file exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let positions = if path.exists() {
            let raw = fs::read(&path).map_err(TransportError::from)?;
            let doc: CheckpointDocument = serde_json::from_slice(&raw).map_err(|e| {
                EventReplayError::Config(format!(
                    "corrupt checkpoint file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            tracing::info!(
                path = %path.display(),
                partitions = doc.positions.len(),
                updated_at = %doc.updated_at,
                "loaded checkpoints"
            );
            doc.positions
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            positions: Mutex::new(positions),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, positions: &BTreeMap<String, StreamPosition>) -> Result<()> {
        let doc = CheckpointDocument {
            version: FORMAT_VERSION,
            updated_at: Utc::now(),
            positions: positions.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&doc).map_err(TransportError::from)?;
        atomic_write(&self.path, &bytes).map_err(TransportError::from)?;
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn get(&self, partition_id: &str) -> Option<StreamPosition> {
        self.positions.lock().get(partition_id).cloned()
    }

    fn set(&self, partition_id: &str, position: StreamPosition) -> Result<()> {
        let mut positions = self.positions.lock();
        // Memory only moves once the file holds the new position
        let mut next = positions.clone();
        next.insert(partition_id.to_string(), position);
        self.persist(&next)?;
        *positions = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn position(seq: &str) -> StreamPosition {
        StreamPosition {
            sequence_number: Some(seq.to_string()),
            iterator_token: None,
        }
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoints/test-1.json");

        {
            let store = FileCheckpointStore::open(&path).unwrap();
            store.set("shard-0", position("00000000000000000005")).unwrap();
            store.set("shard-1", position("00000000000000000009")).unwrap();
        }

        let reopened = FileCheckpointStore::open(&path).unwrap();
        assert_eq!(reopened.get("shard-0"), Some(position("00000000000000000005")));
        assert_eq!(reopened.get("shard-1"), Some(position("00000000000000000009")));
        assert!(reopened.get("shard-2").is_none());
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::open(temp_dir.path().join("none.json")).unwrap();
        assert!(store.get("shard-0").is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_failed_write_leaves_position_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let store = FileCheckpointStore::open(blocker.join("checkpoints.json")).unwrap();
        assert!(store.set("shard-0", position("00000000000000000003")).is_err());
        assert!(store.get("shard-0").is_none());
    }

    #[test]
    fn test_corrupt_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();

        let err = FileCheckpointStore::open(&path).err().unwrap();
        assert!(matches!(err, EventReplayError::Config(_)));
    }
}
