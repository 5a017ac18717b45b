//! Checkpoint stores
//!
//! A checkpoint is the saved `StreamPosition` of one partition. Exactly one
//! consumer owns a partition at a time, so stores only need to be safe for a
//! single writer per partition.
//!
//! - `MemoryCheckpointStore`: process-lifetime only. After a restart every
//!   shard is re-read from its earliest retained record.
//! - `FileCheckpointStore`: JSON document rewritten atomically on each update.

mod file;
mod memory;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

use crate::error::Result;
use crate::types::StreamPosition;

/// Per-partition position storage
pub trait CheckpointStore: Send + Sync {
    /// Saved position, if any
    fn get(&self, partition_id: &str) -> Option<StreamPosition>;

    /// Replace the saved position
    fn set(&self, partition_id: &str, position: StreamPosition) -> Result<()>;
}
