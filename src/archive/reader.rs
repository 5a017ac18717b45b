//! Time-range reader
//!
//! `read` lists once, under the longest common segment prefix of the two
//! range ends, and checks every listed key up front. Objects are only fetched
//! as the returned iterator is advanced, in listing order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::source_prefix;
use crate::error::{EventReplayError, Result};
use crate::transport::ObjectStore;
use crate::types::TimeRange;
use crate::utils::time::parse_minute;

/// Minute segment embedded in every archive key
static KEY_TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}/\d{2}/\d{2}/\d{2}/\d{2}").unwrap());

/// Timestamp embedded in an archive key
pub fn key_timestamp(key: &str) -> Result<DateTime<Utc>> {
    let segment = KEY_TIMESTAMP
        .find(key)
        .ok_or_else(|| EventReplayError::KeyFormat(key.to_string()))?;
    parse_minute(segment.as_str()).map_err(|_| EventReplayError::KeyFormat(key.to_string()))
}

/// Reads archived documents back by time range
pub struct TimeRangeReader {
    store: Arc<dyn ObjectStore>,
    source_name: Option<String>,
}

impl TimeRangeReader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            source_name: None,
        }
    }

    /// Only read keys written under this source name
    pub fn with_source(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = Some(source_name.into());
        self
    }

    /// Prefix listed for `range`
    pub fn listing_prefix(&self, range: &TimeRange) -> String {
        source_prefix(self.source_name.as_deref(), &range.common_prefix())
    }

    /// Documents whose key timestamp lies in `range`, both ends inclusive.
    ///
    /// Fails with `KeyFormat` if any listed key has no timestamp segment.
    pub fn read(&self, bucket: &str, range: &TimeRange) -> Result<ArchiveIter> {
        let prefix = self.listing_prefix(range);
        let listed = self.store.list_objects(bucket, &prefix)?;
        let total = listed.len();

        let mut keys = Vec::with_capacity(total);
        for key in listed {
            if range.contains(&key_timestamp(&key)?) {
                keys.push(key);
            }
        }

        tracing::info!(
            bucket,
            prefix = %prefix,
            listed = total,
            matched = keys.len(),
            "archive range listed"
        );

        Ok(ArchiveIter {
            store: Arc::clone(&self.store),
            bucket: bucket.to_string(),
            keys: keys.into_iter(),
        })
    }

    /// `read` with `YYYY/MM/DD/HH/MM` range ends
    pub fn read_between(&self, bucket: &str, start: &str, end: &str) -> Result<ArchiveIter> {
        self.read(bucket, &TimeRange::parse(start, end)?)
    }
}

/// Lazy sequence of archived documents
pub struct ArchiveIter {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    keys: std::vec::IntoIter<String>,
}

impl ArchiveIter {
    /// Keys not yet fetched
    pub fn remaining_keys(&self) -> &[String] {
        self.keys.as_slice()
    }
}

impl Iterator for ArchiveIter {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.keys.next()?;
        Some(
            self.store
                .get_object(&self.bucket, &key)
                .map_err(EventReplayError::from),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.keys.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveWriter;
    use crate::transport::MemoryObjectStore;
    use crate::types::{AckToken, RawEvent};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    const BUCKET: &str = "event-replay";

    fn archive(store: &Arc<MemoryObjectStore>, events: &[(&str, u32, u32)]) {
        let mut writer = ArchiveWriter::new(store.clone(), BUCKET, "sqs");
        for (id, hour, minute) in events {
            writer.buffer_event(&RawEvent {
                id: id.to_string(),
                received_at: Utc.with_ymd_and_hms(2024, 10, 15, *hour, *minute, 12).unwrap(),
                attributes: BTreeMap::new(),
                body: id.as_bytes().to_vec(),
                ack_token: AckToken::Receipt(format!("r-{}", id)),
            });
        }
        assert_eq!(writer.flush().failed, 0);
    }

    fn read_ids(reader: &TimeRangeReader, start: &str, end: &str) -> Vec<String> {
        let mut ids: Vec<String> = reader
            .read_between(BUCKET, start, end)
            .unwrap()
            .map(|doc| {
                let record = crate::types::ArchivedRecord::from_document(&doc.unwrap()).unwrap();
                record.id
            })
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_range_scenario() {
        let store = Arc::new(MemoryObjectStore::new());
        archive(&store, &[("first", 17, 5), ("second", 18, 10)]);
        let reader = TimeRangeReader::new(store.clone()).with_source("sqs");

        assert_eq!(
            read_ids(&reader, "2024/10/15/17/00", "2024/10/15/17/30"),
            vec!["first".to_string()]
        );
        assert_eq!(
            read_ids(&reader, "2024/10/15/17/00", "2024/10/15/19/30"),
            vec!["first".to_string(), "second".to_string()]
        );
    }

    #[test]
    fn test_range_ends_are_inclusive() {
        let store = Arc::new(MemoryObjectStore::new());
        archive(&store, &[("start", 17, 0), ("end", 17, 30), ("after", 17, 31)]);
        let reader = TimeRangeReader::new(store).with_source("sqs");

        assert_eq!(
            read_ids(&reader, "2024/10/15/17/00", "2024/10/15/17/30"),
            vec!["end".to_string(), "start".to_string()]
        );
    }

    #[test]
    fn test_listing_stays_inside_common_prefix() {
        let store = Arc::new(MemoryObjectStore::new());
        archive(&store, &[("a", 17, 5)]);
        let reader = TimeRangeReader::new(store.clone()).with_source("sqs");

        reader
            .read_between(BUCKET, "2024/10/15/09/00", "2024/10/15/23/59")
            .unwrap()
            .count();
        assert_eq!(store.listed_prefixes(), vec!["sqs/2024/10/15/".to_string()]);
    }

    #[test]
    fn test_read_is_repeatable() {
        let store = Arc::new(MemoryObjectStore::new());
        archive(&store, &[("a", 17, 5), ("b", 17, 6), ("c", 18, 0)]);
        let reader = TimeRangeReader::new(store).with_source("sqs");

        let first = read_ids(&reader, "2024/10/15/17/00", "2024/10/15/18/00");
        let second = read_ids(&reader, "2024/10/15/17/00", "2024/10/15/18/00");
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_key_is_fatal() {
        let store = Arc::new(MemoryObjectStore::new());
        archive(&store, &[("a", 17, 5)]);
        store
            .put_object(BUCKET, "sqs/2024/10/15/17/stray-object", b"{}")
            .unwrap();
        let reader = TimeRangeReader::new(store).with_source("sqs");

        let err = reader
            .read_between(BUCKET, "2024/10/15/17/00", "2024/10/15/17/30")
            .err()
            .unwrap();
        assert!(matches!(err, EventReplayError::KeyFormat(ref key) if key.ends_with("stray-object")));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_objects_fetched_lazily() {
        let store = Arc::new(MemoryObjectStore::new());
        archive(&store, &[("a", 17, 5), ("b", 17, 6)]);
        store.fail_keys_containing("/b");
        let reader = TimeRangeReader::new(store).with_source("sqs");

        let mut iter = reader
            .read_between(BUCKET, "2024/10/15/17/00", "2024/10/15/17/30")
            .unwrap();
        assert_eq!(iter.remaining_keys().len(), 2);
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_key_timestamp() {
        assert_eq!(
            key_timestamp("sqs/2024/10/15/17/05/abc").unwrap(),
            Utc.with_ymd_and_hms(2024, 10, 15, 17, 5, 0).unwrap()
        );
        assert!(key_timestamp("sqs/2024/13/15/17/05/abc").is_err());
        assert!(key_timestamp("sqs/abc").is_err());
    }
}
