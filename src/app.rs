//! Wiring of the bundled local transports into consume and replay runs
//!
//! Each component receives its configuration and capability handles at
//! construction; nothing here is process-wide.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::archive::ArchiveWriter;
use crate::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use crate::config::{AppConfig, ArchiveConfig, CheckpointConfig, ReplayConfig, StreamKind};
use crate::consumer::{ConsumerLoop, ConsumerStats, StopSignal};
use crate::error::{Result, TransportError};
use crate::replayer::{ReplayOutcome, Replayer};
use crate::source::{QueueSource, ShardSource, StreamSource};
use crate::transport::{FsObjectStore, JsonlShardLog, ObjectStore, SpoolQueue};
use crate::types::{RawEvent, TimeRange};
use crate::utils::atomic::cleanup_temp_files;

/// Remove temp files left behind by an interrupted atomic write
fn sweep_temp_files(dir: &Path) {
    if !dir.is_dir() {
        return;
    }
    match cleanup_temp_files(dir) {
        Ok(0) => {}
        Ok(removed) => tracing::info!(dir = %dir.display(), removed, "removed stale temp files"),
        Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "temp file cleanup failed"),
    }
}

/// Checkpoint store selected by the configuration
pub fn open_checkpoints(config: &CheckpointConfig) -> Result<Arc<dyn CheckpointStore>> {
    let store: Arc<dyn CheckpointStore> = match &config.path {
        Some(path) => Arc::new(FileCheckpointStore::open(path)?),
        None => {
            tracing::warn!("no checkpoint file configured, shard positions are lost on restart");
            Arc::new(MemoryCheckpointStore::new())
        }
    };
    Ok(store)
}

/// Archive writer for a source, if archiving is enabled
pub fn archive_writer(
    config: &ArchiveConfig,
    store: Arc<dyn ObjectStore>,
    stream_name: &str,
) -> Option<ArchiveWriter> {
    if !config.enabled {
        return None;
    }
    let source = config.source_name.as_deref().unwrap_or(stream_name);
    Some(ArchiveWriter::new(store, config.bucket.clone(), source))
}

/// Run the consumer loop over the local spool queue or shard log until
/// `stop` is raised or a fatal error occurs
pub fn consume<F>(kind: StreamKind, config: &AppConfig, stop: StopSignal, sink: F) -> Result<ConsumerStats>
where
    F: FnMut(&RawEvent),
{
    sweep_temp_files(&config.local.archive_dir);
    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.local.archive_dir));

    match kind {
        StreamKind::Queue => {
            sweep_temp_files(&config.local.spool_dir);
            let queue = SpoolQueue::new(&config.local.spool_dir);
            queue.create_queue(&config.queue.queue_name)?;
            let source = QueueSource::new(Arc::new(queue), config.queue.clone());
            drive(source, &config.archive, store, stop, sink)
        }
        StreamKind::Shard => {
            fs::create_dir_all(config.local.stream_dir.join(&config.shard.stream_name))
                .map_err(TransportError::from)?;
            let log = JsonlShardLog::new(&config.local.stream_dir);
            let checkpoints = open_checkpoints(&config.checkpoint)?;
            let source = ShardSource::new(Arc::new(log), checkpoints, config.shard.clone());
            drive(source, &config.archive, store, stop, sink)
        }
    }
}

fn drive<S, F>(
    source: S,
    archive: &ArchiveConfig,
    store: Arc<dyn ObjectStore>,
    stop: StopSignal,
    sink: F,
) -> Result<ConsumerStats>
where
    S: StreamSource,
    F: FnMut(&RawEvent),
{
    let writer = archive_writer(archive, store, source.name());
    let mut consumer = ConsumerLoop::new(source, stop);
    if let Some(writer) = writer {
        consumer = consumer.with_archive(writer);
    }
    consumer.run(sink)
}

/// Replay settings with the archive source resolved.
///
/// Without an explicit replay source the range is read from the segment a
/// default queue consume writes to: the archive source name, else the queue
/// name.
pub fn replay_config(config: &AppConfig) -> ReplayConfig {
    let mut replay = config.replay.clone();
    if replay.source_name.is_none() {
        let source = config
            .archive
            .source_name
            .clone()
            .unwrap_or_else(|| config.queue.queue_name.clone());
        replay.source_name = Some(source);
    }
    replay
}

/// Replay a range from the local archive into the local spool queue
pub fn replay(config: &AppConfig, range: &TimeRange) -> Result<ReplayOutcome> {
    sweep_temp_files(&config.local.spool_dir);
    let queue = SpoolQueue::new(&config.local.spool_dir);
    if !config.replay.dry_run {
        queue.create_queue(&config.replay.destination_queue)?;
    }
    let store = Arc::new(FsObjectStore::new(&config.local.archive_dir));

    let replayer = Replayer::new(Arc::new(queue), store, replay_config(config));
    replayer.replay(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryObjectStore;
    use tempfile::TempDir;

    #[test]
    fn test_archive_writer_source_name() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());

        let mut config = ArchiveConfig::default();
        let writer = archive_writer(&config, store.clone(), "orders").unwrap();
        assert_eq!(writer.source(), "orders");

        config.source_name = Some("sqs".to_string());
        let writer = archive_writer(&config, store.clone(), "orders").unwrap();
        assert_eq!(writer.source(), "sqs");

        config.enabled = false;
        assert!(archive_writer(&config, store, "orders").is_none());
    }

    #[test]
    fn test_replay_source_follows_archive() {
        let mut config = AppConfig::default();
        config.queue.queue_name = "orders".to_string();
        assert_eq!(replay_config(&config).source_name.as_deref(), Some("orders"));

        config.archive.source_name = Some("sqs".to_string());
        assert_eq!(replay_config(&config).source_name.as_deref(), Some("sqs"));

        config.replay.source_name = Some("kinesis".to_string());
        assert_eq!(replay_config(&config).source_name.as_deref(), Some("kinesis"));
    }

    #[test]
    fn test_sweep_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let stale = temp_dir.path().join("q/.msg.json.tmp");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, b"partial").unwrap();

        sweep_temp_files(temp_dir.path());
        assert!(!stale.exists());
        sweep_temp_files(&temp_dir.path().join("missing"));
    }

    #[test]
    fn test_open_checkpoints_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = CheckpointConfig {
            path: Some(temp_dir.path().join("checkpoints.json")),
        };
        let store = open_checkpoints(&config).unwrap();
        store
            .set("shard-0", crate::types::StreamPosition::default())
            .unwrap();
        assert!(temp_dir.path().join("checkpoints.json").exists());
    }
}
