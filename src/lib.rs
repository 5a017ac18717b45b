//! Event Replay
//!
//! Consumes a queue or a sharded stream, archives every event into
//! minute-partitioned object storage and replays any time range of the
//! archive back into a queue.
//!
//! # Modules
//!
//! - `types`: Core data structures (RawEvent, ArchivedRecord, TimeRange, cursors)
//! - `transport`: Queue, shard-log and object-store capabilities plus bundled implementations
//! - `checkpoint`: Per-partition position stores (memory, file)
//! - `source`: Queue and shard stream sources
//! - `archive`: Archival writer and time-range reader
//! - `replayer`: Republishes archived events
//! - `consumer`: Fetch / archive / deliver / acknowledge loop
//! - `config`: Typed configuration
//! - `app`: Wiring of the local transports used by the binary
//! - `utils`: Atomic writes and timestamp helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use event_replay::{
//!     ArchiveWriter, ConsumerLoop, MemoryObjectStore, MemoryQueue, QueueSource,
//!     QueueSourceConfig, StopSignal,
//! };
//!
//! let queue = Arc::new(MemoryQueue::new().with_queue("orders"));
//! let store = Arc::new(MemoryObjectStore::new());
//!
//! let source = QueueSource::new(queue, QueueSourceConfig::new("orders"));
//! let writer = ArchiveWriter::new(store, "event-replay", "sqs");
//! let mut consumer = ConsumerLoop::new(source, StopSignal::new()).with_archive(writer);
//! consumer.run(|event| println!("{}", event.id)).unwrap();
//! ```

pub mod app;
pub mod archive;
pub mod checkpoint;
pub mod config;
pub mod consumer;
pub mod error;
pub mod replayer;
pub mod source;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use archive::{ArchiveWriter, FlushReport, TimeRangeReader};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::{
    AckPolicy, Action, AppConfig, ArchiveConfig, CheckpointConfig, QueueSourceConfig,
    ReplayConfig, ShardSourceConfig, StreamKind,
};
pub use consumer::{ConsumerLoop, ConsumerStats, StopSignal};
pub use error::{EventReplayError, Result, TransportError, TransportResult};
pub use replayer::{ReplayOutcome, Replayer};
pub use source::{Commit, QueueSource, ShardSource, StreamSource};
pub use transport::{
    FsObjectStore, JsonlShardLog, MemoryObjectStore, MemoryQueue, MemoryShardLog, ObjectStore,
    QueueClient, ShardLogClient, SpoolQueue,
};
pub use types::{
    AckToken, ArchivedRecord, PartitionKey, RawEvent, ShardCursor, StreamPosition, TimeRange,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
