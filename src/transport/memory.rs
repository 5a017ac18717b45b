//! In-process transports
//!
//! Faithful enough to exercise the engine's delivery semantics: the queue
//! honours visibility timeouts and per-delivery receipt handles, the shard log
//! hands out positional iterators. Each type has switches to inject failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};

use super::{
    decode_iterator, encode_iterator, iterator_offset, select_attributes, sequence_number,
    ObjectStore, QueueClient, QueueMessage, ReceiveRequest, RecordsPage, SendReceipt,
    ShardDescriptor, ShardLogClient, ShardRecord,
};
use crate::error::{TransportError, TransportResult};
use crate::types::{IteratorMode, SENT_TIMESTAMP};
use crate::utils::time::current_timestamp_millis;

/// Message held by the in-memory queue
#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: Vec<u8>,
    attributes: BTreeMap<String, String>,
    receipt: Option<String>,
    invisible_until: Option<Instant>,
    receive_count: u32,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |until| until <= now)
    }
}

/// In-memory queue with visibility-timeout leasing
#[derive(Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, Vec<StoredMessage>>>,
    available: Condvar,
    next_receipt: AtomicU64,
    fail_receives: AtomicBool,
    fail_deletes: AtomicBool,
    fail_sends: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style queue creation
    pub fn with_queue(self, name: &str) -> Self {
        self.create_queue(name);
        self
    }

    pub fn create_queue(&self, name: &str) {
        self.queues.lock().entry(name.to_string()).or_default();
    }

    /// Enqueue with explicit attributes. `SentTimestamp` is filled in when
    /// the caller leaves it out.
    pub fn send_with_attributes(
        &self,
        queue: &str,
        body: &[u8],
        mut attributes: BTreeMap<String, String>,
    ) -> TransportResult<SendReceipt> {
        let mut queues = self.queues.lock();
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;

        attributes
            .entry(SENT_TIMESTAMP.to_string())
            .or_insert_with(|| current_timestamp_millis().to_string());

        let message_id = uuid::Uuid::new_v4().to_string();
        messages.push(StoredMessage {
            message_id: message_id.clone(),
            body: body.to_vec(),
            attributes,
            receipt: None,
            invisible_until: None,
            receive_count: 0,
        });
        self.available.notify_all();

        Ok(SendReceipt { message_id })
    }

    /// Messages still in the queue, visible or leased
    pub fn len(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Bodies currently in the queue, in send order
    pub fn bodies(&self, queue: &str) -> Vec<Vec<u8>> {
        self.queues
            .lock()
            .get(queue)
            .map(|messages| messages.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn fail_receives(&self, fail: bool) {
        self.fail_receives.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    fn lease(
        &self,
        messages: &mut [StoredMessage],
        request: &ReceiveRequest,
        now: Instant,
    ) -> Vec<QueueMessage> {
        let mut batch = Vec::new();
        for message in messages.iter_mut().filter(|m| m.is_visible(now)) {
            if batch.len() >= request.max_messages {
                break;
            }
            let receipt = format!(
                "{}#{}",
                message.message_id,
                self.next_receipt.fetch_add(1, Ordering::SeqCst)
            );
            message.receipt = Some(receipt.clone());
            message.invisible_until = Some(now + request.visibility_timeout);
            message.receive_count += 1;

            let mut attributes = message.attributes.clone();
            attributes.insert(
                "ApproximateReceiveCount".to_string(),
                message.receive_count.to_string(),
            );

            batch.push(QueueMessage {
                message_id: message.message_id.clone(),
                receipt_handle: receipt,
                body: message.body.clone(),
                attributes: select_attributes(&attributes, &request.attribute_names),
            });
        }
        batch
    }
}

impl QueueClient for MemoryQueue {
    fn receive(&self, queue: &str, request: &ReceiveRequest) -> TransportResult<Vec<QueueMessage>> {
        if self.fail_receives.load(Ordering::SeqCst) {
            return Err(TransportError::request("receive", "injected failure"));
        }

        let deadline = Instant::now() + request.wait;
        let mut queues = self.queues.lock();
        loop {
            let now = Instant::now();
            let messages = queues
                .get_mut(queue)
                .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;

            let batch = self.lease(messages, request, now);
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }

            // Wake on send, on the first lease expiry or at the deadline
            let wake_at = messages
                .iter()
                .filter_map(|m| m.invisible_until)
                .filter(|until| *until > now)
                .min()
                .map_or(deadline, |until| until.min(deadline));
            self.available.wait_until(&mut queues, wake_at);
        }
    }

    fn delete(&self, queue: &str, receipt_handles: &[String]) -> TransportResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(TransportError::request("delete", "injected failure"));
        }

        let mut queues = self.queues.lock();
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;

        let mut rejected = Vec::new();
        for handle in receipt_handles {
            match messages
                .iter()
                .position(|m| m.receipt.as_deref() == Some(handle.as_str()))
            {
                Some(idx) => {
                    messages.remove(idx);
                }
                None => rejected.push(handle.clone()),
            }
        }

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(TransportError::InvalidAckTokens(rejected))
        }
    }

    fn send(&self, queue: &str, body: &[u8]) -> TransportResult<SendReceipt> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::request("send", "injected failure"));
        }
        self.send_with_attributes(queue, body, BTreeMap::new())
    }
}

/// In-memory shard log with a fixed shard set
#[derive(Default)]
pub struct MemoryShardLog {
    streams: Mutex<HashMap<String, Vec<(String, Vec<ShardRecord>)>>>,
    iterator_requests: Mutex<Vec<(String, IteratorMode)>>,
    fail_iterators: AtomicBool,
    fail_records: AtomicBool,
}

impl MemoryShardLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stream with `shard_count` empty shards named `shard-N`
    pub fn with_stream(self, stream: &str, shard_count: usize) -> Self {
        let shards = (0..shard_count)
            .map(|i| (format!("shard-{}", i), Vec::new()))
            .collect();
        self.streams.lock().insert(stream.to_string(), shards);
        self
    }

    /// Append a record to a shard, returning its sequence number
    pub fn put_record(
        &self,
        stream: &str,
        shard_id: &str,
        data: &[u8],
        arrival: DateTime<Utc>,
    ) -> TransportResult<String> {
        let mut streams = self.streams.lock();
        let records = Self::shard_mut(&mut streams, stream, shard_id)?;
        let seq = sequence_number(records.len());
        records.push(ShardRecord {
            sequence_number: seq.clone(),
            partition_key: shard_id.to_string(),
            data: data.to_vec(),
            approximate_arrival: arrival,
        });
        Ok(seq)
    }

    /// Every iterator request seen so far, as (shard, mode)
    pub fn iterator_requests(&self) -> Vec<(String, IteratorMode)> {
        self.iterator_requests.lock().clone()
    }

    pub fn fail_iterators(&self, fail: bool) {
        self.fail_iterators.store(fail, Ordering::SeqCst);
    }

    pub fn fail_records(&self, fail: bool) {
        self.fail_records.store(fail, Ordering::SeqCst);
    }

    fn shard_mut<'a>(
        streams: &'a mut HashMap<String, Vec<(String, Vec<ShardRecord>)>>,
        stream: &str,
        shard_id: &str,
    ) -> TransportResult<&'a mut Vec<ShardRecord>> {
        streams
            .get_mut(stream)
            .and_then(|shards| shards.iter_mut().find(|(id, _)| id == shard_id))
            .map(|(_, records)| records)
            .ok_or_else(|| TransportError::StreamNotFound(format!("{}/{}", stream, shard_id)))
    }
}

impl ShardLogClient for MemoryShardLog {
    fn list_shards(&self, stream: &str) -> TransportResult<Vec<ShardDescriptor>> {
        let streams = self.streams.lock();
        let shards = streams
            .get(stream)
            .ok_or_else(|| TransportError::StreamNotFound(stream.to_string()))?;
        Ok(shards
            .iter()
            .map(|(id, _)| ShardDescriptor {
                shard_id: id.clone(),
                starting_sequence_number: sequence_number(0),
            })
            .collect())
    }

    fn get_iterator(
        &self,
        stream: &str,
        shard_id: &str,
        mode: &IteratorMode,
    ) -> TransportResult<String> {
        self.iterator_requests
            .lock()
            .push((shard_id.to_string(), mode.clone()));
        if self.fail_iterators.load(Ordering::SeqCst) {
            return Err(TransportError::request("get_iterator", "injected failure"));
        }

        let mut streams = self.streams.lock();
        let records = Self::shard_mut(&mut streams, stream, shard_id)?;
        let offset = iterator_offset(mode, records.len())?;
        Ok(encode_iterator(stream, shard_id, offset))
    }

    fn get_records(&self, iterator: &str, limit: usize) -> TransportResult<RecordsPage> {
        if self.fail_records.load(Ordering::SeqCst) {
            return Err(TransportError::request("get_records", "injected failure"));
        }

        let (stream, shard_id, offset) = decode_iterator(iterator)?;
        let mut streams = self.streams.lock();
        let records = Self::shard_mut(&mut streams, &stream, &shard_id)?;

        let page: Vec<ShardRecord> = records.iter().skip(offset).take(limit).cloned().collect();
        let next = offset + page.len();
        Ok(RecordsPage {
            records: page,
            next_iterator: Some(encode_iterator(&stream, &shard_id, next)),
        })
    }
}

/// In-memory object store with lexicographic listing
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    listed_prefixes: Mutex<Vec<String>>,
    failing_keys: Mutex<Vec<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes passed to `list_objects`, in call order
    pub fn listed_prefixes(&self) -> Vec<String> {
        self.listed_prefixes.lock().clone()
    }

    /// Number of objects in a bucket
    pub fn object_count(&self, bucket: &str) -> usize {
        self.buckets.lock().get(bucket).map_or(0, BTreeMap::len)
    }

    /// Make puts and gets of keys containing `fragment` fail
    pub fn fail_keys_containing(&self, fragment: &str) {
        self.failing_keys.lock().push(fragment.to_string());
    }

    fn check_failure(&self, operation: &'static str, key: &str) -> TransportResult<()> {
        if self.failing_keys.lock().iter().any(|f| key.contains(f.as_str())) {
            return Err(TransportError::request(operation, format!("injected failure for {}", key)));
        }
        Ok(())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> TransportResult<()> {
        self.check_failure("put_object", key)?;
        self.buckets
            .lock()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body.to_vec());
        Ok(())
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> TransportResult<Vec<String>> {
        self.listed_prefixes.lock().push(prefix.to_string());
        Ok(self
            .buckets
            .lock()
            .get(bucket)
            .map(|objects| {
                objects
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_object(&self, bucket: &str, key: &str) -> TransportResult<Vec<u8>> {
        self.check_failure("get_object", key)?;
        self.buckets
            .lock()
            .get(bucket)
            .and_then(|objects| objects.get(key).cloned())
            .ok_or_else(|| TransportError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}
