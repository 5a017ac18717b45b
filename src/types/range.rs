//! Minute partitions and replay time ranges

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EventReplayError, Result};
use crate::utils::time::{format_minute, parse_minute, truncate_to_minute};

/// Archive partition key, `YYYY/MM/DD/HH/MM` in UTC
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Truncate a timestamp in any timezone to its UTC minute partition
    pub fn from_timestamp<Tz: TimeZone>(ts: &DateTime<Tz>) -> Self {
        PartitionKey(format_minute(ts))
    }

    /// Validate an already formatted partition string
    pub fn parse(value: &str) -> Result<Self> {
        let ts = parse_minute(value)?;
        Ok(Self::from_timestamp(&ts))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Start of the minute this key names
    pub fn to_datetime(&self) -> Result<DateTime<Utc>> {
        parse_minute(&self.0)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive range of minutes to replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, truncating both ends to the minute.
    ///
    /// Fails when `start` is after `end`.
    pub fn new<Tz: TimeZone>(start: &DateTime<Tz>, end: &DateTime<Tz>) -> Result<Self> {
        let start = truncate_to_minute(start);
        let end = truncate_to_minute(end);
        if start > end {
            return Err(EventReplayError::InvalidRange {
                start: format_minute(&start),
                end: format_minute(&end),
            });
        }
        Ok(Self { start, end })
    }

    /// Parse two `YYYY/MM/DD/HH/MM` strings
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(&parse_minute(start)?, &parse_minute(end)?)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Inclusive on both ends
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.start <= *ts && *ts <= self.end
    }

    pub fn start_key(&self) -> PartitionKey {
        PartitionKey::from_timestamp(&self.start)
    }

    pub fn end_key(&self) -> PartitionKey {
        PartitionKey::from_timestamp(&self.end)
    }

    /// Longest common prefix of the formatted ends, cut back to the last
    /// complete path segment (`2024/10/15/` for two times on the same day).
    ///
    /// Empty when the ends share no complete segment.
    pub fn common_prefix(&self) -> String {
        common_segment_prefix(self.start_key().as_str(), self.end_key().as_str())
    }
}

/// Longest shared prefix of `a` and `b` ending in `/`
pub fn common_segment_prefix(a: &str, b: &str) -> String {
    let shared: String = a
        .chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect();

    match shared.rfind('/') {
        Some(idx) => shared[..=idx].to_string(),
        None => String::new(),
    }
}
