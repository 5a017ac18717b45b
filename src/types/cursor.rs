//! Per-partition positions for resumable consumption

use serde::{Deserialize, Serialize};

/// Saved position of one partition.
///
/// `sequence_number` is the last record handed to the consumer; absent means
/// nothing has been processed yet. `iterator_token` is the transport cursor
/// for the next page; absent forces a fresh iterator request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPosition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterator_token: Option<String>,
}

impl StreamPosition {
    pub fn is_empty(&self) -> bool {
        self.sequence_number.is_none() && self.iterator_token.is_none()
    }
}

/// Where a shard iterator starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IteratorMode {
    /// At this exact sequence number
    AtSequenceNumber(String),
    /// Just after this sequence number
    AfterSequenceNumber(String),
    /// Oldest retained record
    TrimHorizon,
    /// Only records added after the iterator is created
    Latest,
}

/// Working cursor of the shard source for one shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardCursor {
    pub shard_id: String,
    pub sequence_number: Option<String>,
    pub shard_iterator_token: Option<String>,
}

impl ShardCursor {
    pub fn new(shard_id: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            sequence_number: None,
            shard_iterator_token: None,
        }
    }

    pub fn from_position(shard_id: impl Into<String>, position: StreamPosition) -> Self {
        Self {
            shard_id: shard_id.into(),
            sequence_number: position.sequence_number,
            shard_iterator_token: position.iterator_token,
        }
    }

    pub fn position(&self) -> StreamPosition {
        StreamPosition {
            sequence_number: self.sequence_number.clone(),
            iterator_token: self.shard_iterator_token.clone(),
        }
    }

    /// Iterator to request when no token is held.
    ///
    /// Without a saved sequence number the shard is read from its first
    /// retained record; otherwise reading resumes just after the last
    /// processed one.
    pub fn iterator_mode(&self, starting_sequence_number: &str) -> IteratorMode {
        match &self.sequence_number {
            Some(seq) => IteratorMode::AfterSequenceNumber(seq.clone()),
            None => IteratorMode::AtSequenceNumber(starting_sequence_number.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_cursor_starts_at_shard_start() {
        let cursor = ShardCursor::new("shard-0");
        assert_eq!(
            cursor.iterator_mode("00000000000000000001"),
            IteratorMode::AtSequenceNumber("00000000000000000001".to_string())
        );
        assert!(cursor.position().is_empty());
    }

    #[test]
    fn test_resumed_cursor_reads_after_last_processed() {
        let position = StreamPosition {
            sequence_number: Some("00000000000000000042".to_string()),
            iterator_token: None,
        };
        let cursor = ShardCursor::from_position("shard-0", position.clone());
        assert_eq!(
            cursor.iterator_mode("00000000000000000001"),
            IteratorMode::AfterSequenceNumber("00000000000000000042".to_string())
        );
        assert_eq!(cursor.position(), position);
    }
}
