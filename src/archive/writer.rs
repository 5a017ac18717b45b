//! Archival writer

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::transport::ObjectStore;
use crate::types::{ArchivedRecord, PartitionKey, RawEvent};

/// Result of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub failed: usize,
}

/// Buffers records by minute partition and writes them to an object store.
///
/// Confined to the loop that drives it; not shared between threads.
pub struct ArchiveWriter {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    source: String,
    groups: BTreeMap<PartitionKey, Vec<ArchivedRecord>>,
}

impl ArchiveWriter {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            source: source.into(),
            groups: BTreeMap::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Records waiting for the next flush
    pub fn pending(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn buffer(&mut self, record: ArchivedRecord) {
        self.groups
            .entry(record.timestamp_partition.clone())
            .or_default()
            .push(record);
    }

    /// Buffer a consumed event under this writer's source name
    pub fn buffer_event(&mut self, event: &RawEvent) {
        self.buffer(ArchivedRecord::from_event(&self.source, event));
    }

    /// Write every buffered record and clear the buffer.
    ///
    /// A record that fails to encode or store is logged and dropped; the
    /// rest of the batch is still written.
    pub fn flush(&mut self) -> FlushReport {
        let mut report = FlushReport::default();

        for (partition, records) in std::mem::take(&mut self.groups) {
            tracing::debug!(partition = %partition, count = records.len(), "flushing partition");
            for record in records {
                let key = record.storage_key();
                let stored = record
                    .to_document()
                    .and_then(|doc| {
                        self.store
                            .put_object(&self.bucket, &key, &doc)
                            .map_err(Into::into)
                    });
                match stored {
                    Ok(()) => report.written += 1,
                    Err(e) => {
                        tracing::error!(bucket = %self.bucket, key = %key, error = %e, "archive write failed");
                        report.failed += 1;
                    }
                }
            }
        }

        if report.written + report.failed > 0 {
            tracing::info!(
                bucket = %self.bucket,
                written = report.written,
                failed = report.failed,
                "archive flush"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryObjectStore;
    use crate::types::AckToken;
    use chrono::{FixedOffset, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn event(id: &str, hour: u32, minute: u32) -> RawEvent {
        RawEvent {
            id: id.to_string(),
            received_at: Utc.with_ymd_and_hms(2024, 10, 15, hour, minute, 31).unwrap(),
            attributes: BTreeMap::new(),
            body: format!("body-{}", id).into_bytes(),
            ack_token: AckToken::Receipt(format!("r-{}", id)),
        }
    }

    #[test]
    fn test_flush_writes_grouped_records() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut writer = ArchiveWriter::new(store.clone(), "event-replay", "sqs");

        writer.buffer_event(&event("a", 17, 5));
        writer.buffer_event(&event("b", 17, 5));
        writer.buffer_event(&event("c", 18, 10));
        assert_eq!(writer.pending(), 3);

        let report = writer.flush();
        assert_eq!(report, FlushReport { written: 3, failed: 0 });
        assert_eq!(writer.pending(), 0);

        let keys = store.list_objects("event-replay", "sqs/").unwrap();
        assert_eq!(
            keys,
            vec![
                "sqs/2024/10/15/17/05/a".to_string(),
                "sqs/2024/10/15/17/05/b".to_string(),
                "sqs/2024/10/15/18/10/c".to_string(),
            ]
        );
    }

    #[test]
    fn test_partition_normalized_to_utc() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut writer = ArchiveWriter::new(store.clone(), "event-replay", "sqs");

        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let mut e = event("tz", 0, 0);
        e.received_at = plus_two
            .with_ymd_and_hms(2024, 10, 15, 19, 5, 0)
            .unwrap()
            .with_timezone(&Utc);
        writer.buffer_event(&e);
        writer.flush();

        assert_eq!(
            store.list_objects("event-replay", "").unwrap(),
            vec!["sqs/2024/10/15/17/05/tz".to_string()]
        );
    }

    #[test]
    fn test_failed_write_does_not_abort_batch() {
        let store = Arc::new(MemoryObjectStore::new());
        store.fail_keys_containing("/bad");
        let mut writer = ArchiveWriter::new(store.clone(), "event-replay", "sqs");

        writer.buffer_event(&event("ok-1", 17, 5));
        writer.buffer_event(&event("bad", 17, 5));
        writer.buffer_event(&event("ok-2", 17, 6));

        let report = writer.flush();
        assert_eq!(report.written, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(store.object_count("event-replay"), 2);
        assert_eq!(writer.pending(), 0);
    }

    #[test]
    fn test_empty_flush() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut writer = ArchiveWriter::new(store, "event-replay", "sqs");
        assert_eq!(writer.flush(), FlushReport::default());
    }
}
