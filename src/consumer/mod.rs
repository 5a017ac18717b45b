//! Consumer loop
//!
//! Drives a stream source until stopped:
//!
//! ```text
//! ┌───────┐    ┌──────────────────┐    ┌──────────┐    ┌─────────────────┐
//! │ fetch │───►│ archive (buffer, │───►│ sink(ev) │───►│ commit (delete/ │
//! │       │    │ flush)           │    │          │    │ checkpoint)     │
//! └───────┘    └──────────────────┘    └──────────┘    └─────────────────┘
//! ```
//!
//! The stop signal is checked once per iteration. Transient fetch errors are
//! logged and polling goes on; fatal errors end the run.

mod stats;

pub use stats::ConsumerStats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::archive::ArchiveWriter;
use crate::error::Result;
use crate::source::StreamSource;
use crate::types::RawEvent;

/// Cooperative cancellation flag shared with the loop
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fetch, archive, deliver, acknowledge
pub struct ConsumerLoop<S: StreamSource> {
    source: S,
    archive: Option<ArchiveWriter>,
    stop: StopSignal,
    stats: ConsumerStats,
}

impl<S: StreamSource> ConsumerLoop<S> {
    pub fn new(source: S, stop: StopSignal) -> Self {
        Self {
            source,
            archive: None,
            stop,
            stats: ConsumerStats::default(),
        }
    }

    /// Archive every fetched event before it reaches the sink
    pub fn with_archive(mut self, writer: ArchiveWriter) -> Self {
        self.archive = Some(writer);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// One iteration. Returns the number of events delivered to the sink.
    pub fn poll_once<F>(&mut self, sink: &mut F) -> Result<usize>
    where
        F: FnMut(&RawEvent),
    {
        let events = self.source.fetch()?;
        if events.is_empty() {
            return Ok(0);
        }
        self.stats.batches += 1;

        if let Some(writer) = self.archive.as_mut() {
            for event in &events {
                writer.buffer_event(event);
            }
            let report = writer.flush();
            self.stats.record_flush(report);
        }

        for event in &events {
            sink(event);
        }
        self.stats.events += events.len() as u64;

        let commit = self.source.commit(&events);
        self.stats.record_commit(commit);

        Ok(events.len())
    }

    /// Poll until the stop signal is raised or a fatal error occurs
    pub fn run<F>(&mut self, mut sink: F) -> Result<ConsumerStats>
    where
        F: FnMut(&RawEvent),
    {
        tracing::info!(source = %self.source.name(), archive = self.archive.is_some(), "consumer started");

        while !self.stop.is_stopped() {
            match self.poll_once(&mut sink) {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    tracing::error!(source = %self.source.name(), error = %e, "consumer stopped on error");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(source = %self.source.name(), error = %e, "fetch failed");
                    self.stats.transient_errors += 1;
                }
            }
        }

        tracing::info!(
            source = %self.source.name(),
            events = self.stats.events,
            archived = self.stats.archived,
            acknowledged = self.stats.acknowledged,
            "consumer stopped"
        );
        Ok(self.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::config::{QueueSourceConfig, ShardSourceConfig};
    use crate::error::{EventReplayError, TransportError};
    use crate::source::{Commit, QueueSource, ShardSource};
    use crate::transport::{MemoryObjectStore, MemoryQueue, MemoryShardLog, ObjectStore, QueueClient};
    use crate::types::AckToken;
    use chrono::{TimeZone, Utc};
    use std::collections::{BTreeMap, VecDeque};
    use std::time::Duration;

    /// Source that plays back a fixed script of fetch results
    struct ScriptedSource {
        script: VecDeque<Result<Vec<RawEvent>>>,
        committed: usize,
    }

    impl StreamSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        fn fetch(&mut self) -> Result<Vec<RawEvent>> {
            self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        fn commit(&mut self, events: &[RawEvent]) -> Commit {
            self.committed += events.len();
            Commit {
                acknowledged: events.len(),
                ..Default::default()
            }
        }
    }

    fn event(id: &str) -> RawEvent {
        RawEvent {
            id: id.to_string(),
            received_at: Utc.with_ymd_and_hms(2024, 10, 15, 17, 5, 0).unwrap(),
            attributes: BTreeMap::new(),
            body: id.as_bytes().to_vec(),
            ack_token: AckToken::Receipt(format!("r-{}", id)),
        }
    }

    fn queue_config(delete: bool) -> QueueSourceConfig {
        let mut config = QueueSourceConfig::new("orders");
        config.wait_time = Duration::ZERO;
        config.visibility_timeout = Duration::ZERO;
        config.ack.delete_messages = delete;
        config
    }

    #[test]
    fn test_stop_before_start_does_nothing() {
        let stop = StopSignal::new();
        stop.stop();
        let source = ScriptedSource {
            script: VecDeque::from(vec![Ok(vec![event("a")])]),
            committed: 0,
        };
        let mut consumer = ConsumerLoop::new(source, stop);
        let stats = consumer.run(|_| panic!("nothing should be delivered")).unwrap();
        assert_eq!(stats, ConsumerStats::default());
    }

    #[test]
    fn test_transient_errors_do_not_stop_the_loop() {
        let stop = StopSignal::new();
        let source = ScriptedSource {
            script: VecDeque::from(vec![
                Err(TransportError::request("receive", "timeout").into()),
                Err(TransportError::request("receive", "timeout").into()),
                Ok(vec![event("a"), event("b")]),
            ]),
            committed: 0,
        };
        let mut consumer = ConsumerLoop::new(source, stop.clone());

        let mut seen = Vec::new();
        let stats = consumer
            .run(|e| {
                seen.push(e.id.clone());
                stop.stop();
            })
            .unwrap();

        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(stats.transient_errors, 2);
        assert_eq!(stats.events, 2);
        assert_eq!(stats.acknowledged, 2);
        assert_eq!(consumer.source().committed, 2);
    }

    #[test]
    fn test_fatal_error_ends_the_run() {
        let source = ScriptedSource {
            script: VecDeque::from(vec![Err(EventReplayError::IteratorAcquisition {
                shard_id: "shard-0".to_string(),
                source: TransportError::request("get_iterator", "throttled"),
            })]),
            committed: 0,
        };
        let mut consumer = ConsumerLoop::new(source, StopSignal::new());
        let err = consumer.run(|_| {}).unwrap_err();
        assert!(matches!(err, EventReplayError::IteratorAcquisition { .. }));
    }

    #[test]
    fn test_events_archived_before_delivery() {
        let queue = Arc::new(MemoryQueue::new().with_queue("orders"));
        queue.send("orders", b"one").unwrap();
        let store = Arc::new(MemoryObjectStore::new());

        let source = QueueSource::new(queue, queue_config(true));
        let writer = ArchiveWriter::new(store.clone(), "event-replay", "sqs");
        let mut consumer = ConsumerLoop::new(source, StopSignal::new()).with_archive(writer);

        let mut archived_at_delivery = 0;
        let delivered = consumer
            .poll_once(&mut |_| archived_at_delivery = store.object_count("event-replay"))
            .unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(archived_at_delivery, 1);
        assert_eq!(consumer.stats().archived, 1);
        assert_eq!(consumer.stats().acknowledged, 1);
    }

    #[test]
    fn test_redelivery_when_deletes_disabled() {
        let queue = Arc::new(MemoryQueue::new().with_queue("orders"));
        queue.send("orders", b"one").unwrap();
        let stop = StopSignal::new();

        let source = QueueSource::new(queue.clone(), queue_config(false));
        let mut consumer = ConsumerLoop::new(source, stop.clone());

        let mut ids = Vec::new();
        let stats = consumer
            .run(|e| {
                ids.push(e.id.clone());
                if ids.len() == 3 {
                    stop.stop();
                }
            })
            .unwrap();

        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(stats.ack_skipped, 3);
        assert_eq!(queue.len("orders"), 1);
    }

    #[test]
    fn test_redelivery_when_delete_fails() {
        let queue = Arc::new(MemoryQueue::new().with_queue("orders"));
        queue.send("orders", b"one").unwrap();
        queue.fail_deletes(true);
        let stop = StopSignal::new();

        let source = QueueSource::new(queue.clone(), queue_config(true));
        let mut consumer = ConsumerLoop::new(source, stop.clone());

        let mut ids = Vec::new();
        let stats = consumer
            .run(|e| {
                ids.push(e.id.clone());
                if ids.len() == 2 {
                    stop.stop();
                }
            })
            .unwrap();

        assert_eq!(ids[0], ids[1]);
        assert_eq!(stats.ack_failures, 2);
        assert_eq!(stats.acknowledged, 0);
    }

    #[test]
    fn test_shard_source_with_archive() {
        let log = Arc::new(MemoryShardLog::new().with_stream("test-1", 2));
        let arrival = Utc.with_ymd_and_hms(2024, 10, 15, 17, 5, 0).unwrap();
        log.put_record("test-1", "shard-0", b"a", arrival).unwrap();
        log.put_record("test-1", "shard-1", b"b", arrival).unwrap();
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let store = Arc::new(MemoryObjectStore::new());

        let mut config = ShardSourceConfig::new("test-1");
        config.empty_backoff = Duration::ZERO;
        let source = ShardSource::new(log, checkpoints.clone(), config);
        let writer = ArchiveWriter::new(store.clone(), "event-replay", "kinesis");
        let mut consumer = ConsumerLoop::new(source, StopSignal::new()).with_archive(writer);

        let mut sink = |_: &RawEvent| {};
        assert_eq!(consumer.poll_once(&mut sink).unwrap(), 1);
        assert_eq!(consumer.poll_once(&mut sink).unwrap(), 1);
        assert_eq!(consumer.poll_once(&mut sink).unwrap(), 0);

        assert_eq!(checkpoints.partitions(), vec!["shard-0".to_string(), "shard-1".to_string()]);
        assert_eq!(
            store.list_objects("event-replay", "kinesis/2024/10/15/17/05/").unwrap().len(),
            2
        );
    }
}
