//! Transport capabilities
//!
//! The engine never talks to a concrete service. Queue, shard-log and object
//! store access go through the traits below and are injected as
//! `Arc<dyn ...>` at construction.
//!
//! Implementations shipped with the crate:
//! - `memory`: in-process queue, shard log and object store
//! - `fs`: directory-backed object store
//! - `spool`: directory-backed queue
//! - `jsonl`: directory-backed shard log, one JSONL file per shard

pub mod fs;
pub mod jsonl;
pub mod memory;
pub mod spool;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{TransportError, TransportResult};
use crate::types::IteratorMode;

pub use fs::FsObjectStore;
pub use jsonl::JsonlShardLog;
pub use memory::{MemoryObjectStore, MemoryQueue, MemoryShardLog};
pub use spool::SpoolQueue;

/// Parameters of one queue receive call
#[derive(Debug, Clone)]
pub struct ReceiveRequest {
    pub max_messages: usize,
    /// Long-poll bound when the queue is empty
    pub wait: Duration,
    /// How long delivered messages stay hidden from other consumers
    pub visibility_timeout: Duration,
    /// Attributes to return with each message (`All` for every attribute)
    pub attribute_names: Vec<String>,
}

/// Message as returned by a queue transport
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub message_id: String,
    /// Valid for this delivery only
    pub receipt_handle: String,
    pub body: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
}

/// Result of a queue send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
}

/// Queue capability
pub trait QueueClient: Send + Sync {
    /// Lease up to `max_messages` visible messages, waiting up to `wait`
    fn receive(&self, queue: &str, request: &ReceiveRequest) -> TransportResult<Vec<QueueMessage>>;

    /// Remove delivered messages. Valid handles are deleted even when some
    /// of the batch is rejected.
    fn delete(&self, queue: &str, receipt_handles: &[String]) -> TransportResult<()>;

    /// Publish a new message
    fn send(&self, queue: &str, body: &[u8]) -> TransportResult<SendReceipt>;
}

/// Shard of a shard-log stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    pub shard_id: String,
    pub starting_sequence_number: String,
}

/// Record as returned by a shard-log transport
#[derive(Debug, Clone, PartialEq)]
pub struct ShardRecord {
    pub sequence_number: String,
    pub partition_key: String,
    pub data: Vec<u8>,
    pub approximate_arrival: DateTime<Utc>,
}

/// One page of a shard
#[derive(Debug, Clone, PartialEq)]
pub struct RecordsPage {
    pub records: Vec<ShardRecord>,
    /// Absent once the shard is closed
    pub next_iterator: Option<String>,
}

/// Shard-log capability
pub trait ShardLogClient: Send + Sync {
    fn list_shards(&self, stream: &str) -> TransportResult<Vec<ShardDescriptor>>;

    fn get_iterator(&self, stream: &str, shard_id: &str, mode: &IteratorMode)
        -> TransportResult<String>;

    fn get_records(&self, iterator: &str, limit: usize) -> TransportResult<RecordsPage>;
}

/// Object-store capability
pub trait ObjectStore: Send + Sync {
    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> TransportResult<()>;

    /// Keys under `prefix`, in the store's native listing order
    fn list_objects(&self, bucket: &str, prefix: &str) -> TransportResult<Vec<String>>;

    fn get_object(&self, bucket: &str, key: &str) -> TransportResult<Vec<u8>>;
}

/// Sequence number of the record at `offset` (0-based) in a shard
pub(crate) fn sequence_number(offset: usize) -> String {
    format!("{:020}", offset + 1)
}

/// Inverse of `sequence_number`
pub(crate) fn sequence_offset(sequence_number: &str) -> TransportResult<usize> {
    sequence_number
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .ok_or_else(|| TransportError::InvalidIterator(format!("bad sequence number {}", sequence_number)))
}

/// Offset of the first record an iterator in `mode` reads, given the shard
/// currently holds `len` records
pub(crate) fn iterator_offset(mode: &IteratorMode, len: usize) -> TransportResult<usize> {
    Ok(match mode {
        IteratorMode::AtSequenceNumber(seq) => sequence_offset(seq)?,
        IteratorMode::AfterSequenceNumber(seq) => sequence_offset(seq)? + 1,
        IteratorMode::TrimHorizon => 0,
        IteratorMode::Latest => len,
    })
}

/// Iterator token: `{stream}/{shard}/{offset}`
pub(crate) fn encode_iterator(stream: &str, shard_id: &str, offset: usize) -> String {
    format!("{}/{}/{}", stream, shard_id, offset)
}

/// Split an iterator token into stream, shard and offset
pub(crate) fn decode_iterator(token: &str) -> TransportResult<(String, String, usize)> {
    let invalid = || TransportError::InvalidIterator(token.to_string());
    let mut parts = token.rsplitn(3, '/');
    let offset = parts
        .next()
        .and_then(|o| o.parse::<usize>().ok())
        .ok_or_else(invalid)?;
    let shard_id = parts.next().ok_or_else(invalid)?;
    let stream = parts.next().ok_or_else(invalid)?;
    Ok((stream.to_string(), shard_id.to_string(), offset))
}

/// Keep only the requested attributes (`All` keeps everything)
pub(crate) fn select_attributes(
    attributes: &BTreeMap<String, String>,
    names: &[String],
) -> BTreeMap<String, String> {
    if names.iter().any(|n| n == "All") {
        return attributes.clone();
    }
    attributes
        .iter()
        .filter(|(k, _)| names.iter().any(|n| n == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
