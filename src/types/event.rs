//! Raw events as delivered by a stream source

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::range::PartitionKey;

/// Queue attribute carrying the send time in epoch milliseconds
pub const SENT_TIMESTAMP: &str = "SentTimestamp";

/// Token needed to acknowledge an event.
///
/// Queue events carry the receipt handle of this particular delivery; shard
/// events carry their position so the checkpoint can advance past them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckToken {
    Receipt(String),
    Sequence {
        shard_id: String,
        sequence_number: String,
    },
}

impl AckToken {
    /// Receipt handle, for queue deliveries
    pub fn receipt(&self) -> Option<&str> {
        match self {
            AckToken::Receipt(handle) => Some(handle),
            AckToken::Sequence { .. } => None,
        }
    }
}

/// One event fetched from a stream source
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Transport-assigned message id (queue) or sequence number (shard)
    pub id: String,
    /// When the transport received the event, in UTC
    pub received_at: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub ack_token: AckToken,
}

impl RawEvent {
    /// Archive partition this event belongs to
    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::from_timestamp(&self.received_at)
    }

    /// Body as text, if it is valid UTF-8
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_partition_key_from_received_at() {
        let event = RawEvent {
            id: "m-1".to_string(),
            received_at: Utc.with_ymd_and_hms(2024, 10, 15, 17, 5, 31).unwrap(),
            attributes: BTreeMap::new(),
            body: b"hello".to_vec(),
            ack_token: AckToken::Receipt("r-1".to_string()),
        };

        assert_eq!(event.partition_key().as_str(), "2024/10/15/17/05");
        assert_eq!(event.body_str(), Some("hello"));
        assert_eq!(event.ack_token.receipt(), Some("r-1"));
    }

    #[test]
    fn test_ack_token_serialization() {
        let token = AckToken::Sequence {
            shard_id: "shard-0".to_string(),
            sequence_number: "00000000000000000007".to_string(),
        };
        let json = serde_json::to_string(&token).unwrap();
        assert!(json.contains("\"sequence\""));

        let parsed: AckToken = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, token);
        assert!(parsed.receipt().is_none());
    }
}
