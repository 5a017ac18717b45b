//! Typed configuration
//!
//! Every recognised option is a field here; nothing is injected from
//! free-form keyword maps. Defaults carry the values the consumer has always
//! run with (180 s visibility, batches of 5, 5 s long-poll, 3 s empty-shard
//! backoff). Durations are written as seconds in configuration files.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EventReplayError, Result};
use crate::types::SENT_TIMESTAMP;

/// Serde helper: `Duration` as (fractional) seconds
mod secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(de::Error::custom(format!("invalid duration: {}", secs)));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// What to do with queue messages once they have been delivered.
///
/// Deleting is off by default: the consumer then mirrors the queue into the
/// archive without draining it, and every message comes back after each
/// visibility timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AckPolicy {
    pub delete_messages: bool,
}

/// Queue source options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueSourceConfig {
    pub queue_name: String,
    #[serde(with = "secs")]
    pub visibility_timeout: Duration,
    pub max_messages: usize,
    #[serde(with = "secs")]
    pub wait_time: Duration,
    pub attribute_names: Vec<String>,
    pub ack: AckPolicy,
}

impl Default for QueueSourceConfig {
    fn default() -> Self {
        Self {
            queue_name: "eventreplay".to_string(),
            visibility_timeout: Duration::from_secs(180),
            max_messages: 5,
            wait_time: Duration::from_secs(5),
            attribute_names: vec![SENT_TIMESTAMP.to_string()],
            ack: AckPolicy::default(),
        }
    }
}

impl QueueSourceConfig {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Default::default()
        }
    }
}

/// Shard source options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShardSourceConfig {
    pub stream_name: String,
    /// Records requested per page
    pub page_limit: usize,
    /// Pause after an empty page
    #[serde(with = "secs")]
    pub empty_backoff: Duration,
}

impl Default for ShardSourceConfig {
    fn default() -> Self {
        Self {
            stream_name: "test-1".to_string(),
            page_limit: 10,
            empty_backoff: Duration::from_secs(3),
        }
    }
}

impl ShardSourceConfig {
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            ..Default::default()
        }
    }
}

/// Archival options for the consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArchiveConfig {
    pub enabled: bool,
    /// Storage destination
    pub bucket: String,
    /// First key segment; defaults to the queue or stream name
    pub source_name: Option<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket: "event-replay".to_string(),
            source_name: None,
        }
    }
}

/// Replay options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReplayConfig {
    /// Bucket holding the archive
    pub bucket: String,
    /// First key segment the archive was written under; the binary falls
    /// back to the archive source name
    pub source_name: Option<String>,
    pub destination_queue: String,
    /// Count matching messages without publishing
    pub dry_run: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            bucket: "event-replay".to_string(),
            source_name: None,
            destination_queue: "eventreplay".to_string(),
            dry_run: false,
        }
    }
}

/// Checkpoint persistence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CheckpointConfig {
    /// JSON checkpoint file; in-memory checkpoints when absent
    pub path: Option<PathBuf>,
}

/// Local directories backing the bundled transports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocalTransportConfig {
    pub spool_dir: PathBuf,
    pub stream_dir: PathBuf,
    pub archive_dir: PathBuf,
}

impl Default for LocalTransportConfig {
    fn default() -> Self {
        let data = PathBuf::from("data");
        Self {
            spool_dir: data.join("spool"),
            stream_dir: data.join("streams"),
            archive_dir: data.join("archive"),
        }
    }
}

/// Full configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub queue: QueueSourceConfig,
    pub shard: ShardSourceConfig,
    pub archive: ArchiveConfig,
    pub checkpoint: CheckpointConfig,
    pub replay: ReplayConfig,
    pub local: LocalTransportConfig,
}

impl AppConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EventReplayError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| EventReplayError::Config(e.to_string()))
    }
}

/// Top-level action selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Consume,
    Replay,
}

impl FromStr for Action {
    type Err = EventReplayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "consume" => Ok(Action::Consume),
            "replay" => Ok(Action::Replay),
            other => Err(EventReplayError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Consume => write!(f, "consume"),
            Action::Replay => write!(f, "replay"),
        }
    }
}

/// Stream-type selector for the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Queue,
    Shard,
}

impl FromStr for StreamKind {
    type Err = EventReplayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queue" | "sqs" => Ok(StreamKind::Queue),
            "shard" | "kinesis" => Ok(StreamKind::Shard),
            other => Err(EventReplayError::UnknownStreamType(other.to_string())),
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Queue => write!(f, "queue"),
            StreamKind::Shard => write!(f, "shard"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.queue.visibility_timeout, Duration::from_secs(180));
        assert_eq!(config.queue.max_messages, 5);
        assert_eq!(config.queue.wait_time, Duration::from_secs(5));
        assert_eq!(config.queue.attribute_names, vec!["SentTimestamp".to_string()]);
        assert!(!config.queue.ack.delete_messages);
        assert_eq!(config.shard.page_limit, 10);
        assert!(config.archive.enabled);
        assert!(config.checkpoint.path.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = AppConfig::from_json(
            r#"{
                "queue": { "queueName": "orders", "waitTime": 0.5, "ack": { "deleteMessages": true } },
                "shard": { "emptyBackoff": 0 },
                "archive": { "bucket": "event-replay-3jxh", "sourceName": "sqs" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.queue.queue_name, "orders");
        assert_eq!(config.queue.wait_time, Duration::from_millis(500));
        assert_eq!(config.queue.visibility_timeout, Duration::from_secs(180));
        assert!(config.queue.ack.delete_messages);
        assert_eq!(config.shard.empty_backoff, Duration::ZERO);
        assert_eq!(config.archive.source_name.as_deref(), Some("sqs"));
        assert_eq!(config.replay.destination_queue, "eventreplay");
    }

    #[test]
    fn test_negative_duration_rejected() {
        let err = AppConfig::from_json(r#"{ "queue": { "waitTime": -1 } }"#).unwrap_err();
        assert!(matches!(err, EventReplayError::Config(_)));
    }

    #[test]
    fn test_selectors() {
        assert_eq!("consume".parse::<Action>().unwrap(), Action::Consume);
        assert_eq!("replay".parse::<Action>().unwrap(), Action::Replay);
        assert!(matches!(
            "drain".parse::<Action>(),
            Err(EventReplayError::UnknownAction(_))
        ));

        assert_eq!("sqs".parse::<StreamKind>().unwrap(), StreamKind::Queue);
        assert_eq!("shard".parse::<StreamKind>().unwrap(), StreamKind::Shard);
        assert!(matches!(
            "kafka".parse::<StreamKind>(),
            Err(EventReplayError::UnknownStreamType(_))
        ));
    }
}
