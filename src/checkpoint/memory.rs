//! In-memory checkpoint store

use std::collections::HashMap;

use parking_lot::RwLock;

use super::CheckpointStore;
use crate::error::Result;
use crate::types::StreamPosition;

/// Checkpoints held in memory for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    positions: RwLock<HashMap<String, StreamPosition>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partitions with a saved position
    pub fn partitions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.positions.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get(&self, partition_id: &str) -> Option<StreamPosition> {
        self.positions.read().get(partition_id).cloned()
    }

    fn set(&self, partition_id: &str, position: StreamPosition) -> Result<()> {
        self.positions
            .write()
            .insert(partition_id.to_string(), position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let store = MemoryCheckpointStore::new();
        assert!(store.get("shard-0").is_none());

        let position = StreamPosition {
            sequence_number: Some("00000000000000000003".to_string()),
            iterator_token: Some("test-1/shard-0/3".to_string()),
        };
        store.set("shard-0", position.clone()).unwrap();

        assert_eq!(store.get("shard-0"), Some(position));
        assert!(store.get("shard-1").is_none());
        assert_eq!(store.partitions(), vec!["shard-0".to_string()]);
    }
}
