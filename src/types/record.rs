//! Archived records and their stored document form
//!
//! A record is written once to `{source}/{YYYY}/{MM}/{DD}/{HH}/{mm}/{id}` and
//! never modified. The stored value is a pretty-printed JSON document that
//! carries the attributes, the payload and some archival metadata.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::body::{decode_body, encode_body, BodyEncoding};
use super::event::RawEvent;
use super::range::PartitionKey;
use crate::error::{EventReplayError, Result};

/// An event as kept in the archive
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedRecord {
    pub id: String,
    /// Stream the record was consumed from (first key segment)
    pub source: String,
    pub timestamp_partition: PartitionKey,
    pub received_at: DateTime<Utc>,
    pub original_attributes: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// On-disk layout of an archived record
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchivedDocument {
    message_id: String,
    source: String,
    timestamp_partition: PartitionKey,
    received_at: DateTime<Utc>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    body: String,
    #[serde(default)]
    body_encoding: BodyEncoding,
    #[serde(skip_serializing_if = "Option::is_none")]
    archived_at: Option<DateTime<Utc>>,
}

impl ArchivedRecord {
    /// Build the archive form of a consumed event
    pub fn from_event(source: &str, event: &RawEvent) -> Self {
        Self {
            id: event.id.clone(),
            source: source.to_string(),
            timestamp_partition: event.partition_key(),
            received_at: event.received_at,
            original_attributes: event.attributes.clone(),
            body: event.body.clone(),
        }
    }

    /// Object key: `{source}/{timestampPartition}/{id}`
    pub fn storage_key(&self) -> String {
        format!("{}/{}/{}", self.source, self.timestamp_partition, self.id)
    }

    /// Serialize to the stored document
    pub fn to_document(&self) -> Result<Vec<u8>> {
        let (body, body_encoding) = encode_body(&self.body);
        let doc = ArchivedDocument {
            message_id: self.id.clone(),
            source: self.source.clone(),
            timestamp_partition: self.timestamp_partition.clone(),
            received_at: self.received_at,
            attributes: self.original_attributes.clone(),
            body,
            body_encoding,
            archived_at: Some(Utc::now()),
        };
        serde_json::to_vec_pretty(&doc).map_err(EventReplayError::Encode)
    }

    /// Parse a stored document
    pub fn from_document(bytes: &[u8]) -> Result<Self> {
        let doc: ArchivedDocument =
            serde_json::from_slice(bytes).map_err(|e| EventReplayError::Decode(e.to_string()))?;
        let body = decode_body(&doc.body, doc.body_encoding)
            .map_err(|e| EventReplayError::Decode(e.to_string()))?;

        Ok(Self {
            id: doc.message_id,
            source: doc.source,
            timestamp_partition: doc.timestamp_partition,
            received_at: doc.received_at,
            original_attributes: doc.attributes,
            body,
        })
    }
}
