//! Shard source: round-robin polling of a shard-log stream with checkpoints
//!
//! Each shard keeps a working cursor. A shard touched for the first time
//! starts from its saved checkpoint, or from its starting sequence number when
//! nothing was saved. Positions of a delivered page are only written to the
//! checkpoint store in `commit`, so a crash between fetch and commit replays
//! the page instead of skipping it.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use super::{Commit, StreamSource};
use crate::checkpoint::CheckpointStore;
use crate::config::ShardSourceConfig;
use crate::error::{EventReplayError, Result};
use crate::transport::{ShardDescriptor, ShardLogClient, ShardRecord};
use crate::types::{AckToken, RawEvent, ShardCursor};

/// Attribute carrying the record's partition key
pub const PARTITION_KEY_ATTRIBUTE: &str = "partitionKey";
/// Attribute carrying the shard the record was read from
pub const SHARD_ID_ATTRIBUTE: &str = "shardId";

/// Polling state of one shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
    NoCursor,
    IteratorRequested,
    Polling,
    HasRecords,
    EmptyBackoff,
}

/// Consumes every shard of one stream
pub struct ShardSource {
    client: Arc<dyn ShardLogClient>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: ShardSourceConfig,
    shards: Option<Vec<ShardDescriptor>>,
    cursors: HashMap<String, ShardCursor>,
    states: HashMap<String, ShardState>,
    next_shard: usize,
    /// Cursor of the last delivered page, written on commit
    pending: Option<ShardCursor>,
}

impl ShardSource {
    pub fn new(
        client: Arc<dyn ShardLogClient>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: ShardSourceConfig,
    ) -> Self {
        Self {
            client,
            checkpoints,
            config,
            shards: None,
            cursors: HashMap::new(),
            states: HashMap::new(),
            next_shard: 0,
            pending: None,
        }
    }

    pub fn config(&self) -> &ShardSourceConfig {
        &self.config
    }

    pub fn shard_state(&self, shard_id: &str) -> ShardState {
        self.states
            .get(shard_id)
            .copied()
            .unwrap_or(ShardState::NoCursor)
    }

    /// Working cursor of a shard, if it has been polled
    pub fn cursor(&self, shard_id: &str) -> Option<&ShardCursor> {
        self.cursors.get(shard_id)
    }

    fn shards(&mut self) -> Result<Vec<ShardDescriptor>> {
        if let Some(shards) = &self.shards {
            return Ok(shards.clone());
        }
        let shards = self.client.list_shards(&self.config.stream_name)?;
        tracing::info!(
            stream = %self.config.stream_name,
            shards = shards.len(),
            "listed shards"
        );
        // An empty stream is listed again on the next pass
        if !shards.is_empty() {
            self.shards = Some(shards.clone());
        }
        Ok(shards)
    }

    fn set_state(&mut self, shard_id: &str, state: ShardState) {
        self.states.insert(shard_id.to_string(), state);
    }

    fn load_cursor(&self, shard_id: &str) -> ShardCursor {
        if let Some(cursor) = self.cursors.get(shard_id) {
            return cursor.clone();
        }
        match self.checkpoints.get(shard_id) {
            Some(position) => {
                tracing::info!(
                    shard_id,
                    sequence_number = ?position.sequence_number,
                    "resuming from checkpoint"
                );
                ShardCursor::from_position(shard_id, position)
            }
            None => ShardCursor::new(shard_id),
        }
    }

    fn save_cursor(&self, cursor: &ShardCursor) -> bool {
        match self.checkpoints.set(&cursor.shard_id, cursor.position()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(shard_id = %cursor.shard_id, error = %e, "checkpoint write failed");
                false
            }
        }
    }

    /// Poll one page of a shard, advancing its working cursor
    fn poll_shard(&mut self, shard: &ShardDescriptor) -> Result<Vec<ShardRecord>> {
        let shard_id = shard.shard_id.as_str();
        let mut cursor = self.load_cursor(shard_id);

        let iterator = match cursor.shard_iterator_token.clone() {
            Some(token) => token,
            None => {
                self.set_state(shard_id, ShardState::IteratorRequested);
                let mode = cursor.iterator_mode(&shard.starting_sequence_number);
                tracing::debug!(shard_id, ?mode, "requesting shard iterator");
                self.client
                    .get_iterator(&self.config.stream_name, shard_id, &mode)
                    .map_err(|source| EventReplayError::IteratorAcquisition {
                        shard_id: shard_id.to_string(),
                        source,
                    })?
            }
        };

        self.set_state(shard_id, ShardState::Polling);
        let page = match self.client.get_records(&iterator, self.config.page_limit) {
            Ok(page) => page,
            Err(source) => {
                // Next pass, or the next process, asks for a fresh iterator
                // from the last processed record
                cursor.shard_iterator_token = None;
                self.save_cursor(&cursor);
                self.cursors.insert(shard_id.to_string(), cursor);
                return Err(EventReplayError::RecordFetch {
                    shard_id: shard_id.to_string(),
                    source,
                });
            }
        };

        if page.next_iterator.is_none() {
            tracing::warn!(shard_id, "shard closed");
        }
        cursor.shard_iterator_token = page.next_iterator;

        if page.records.is_empty() {
            self.set_state(shard_id, ShardState::EmptyBackoff);
            // Nothing delivered, so the new token can be saved right away
            self.save_cursor(&cursor);
        } else {
            self.set_state(shard_id, ShardState::HasRecords);
            if let Some(last) = page.records.last() {
                cursor.sequence_number = Some(last.sequence_number.clone());
            }
            self.pending = Some(cursor.clone());
        }
        self.cursors.insert(shard_id.to_string(), cursor);

        Ok(page.records)
    }

    fn backoff(&self) {
        if !self.config.empty_backoff.is_zero() {
            thread::sleep(self.config.empty_backoff);
        }
    }

    fn flush_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(cursor) => self.save_cursor(&cursor),
            None => true,
        }
    }
}

fn raw_event_from_record(shard_id: &str, record: ShardRecord) -> RawEvent {
    let mut attributes = std::collections::BTreeMap::new();
    attributes.insert(PARTITION_KEY_ATTRIBUTE.to_string(), record.partition_key);
    attributes.insert(SHARD_ID_ATTRIBUTE.to_string(), shard_id.to_string());

    // Sequence numbers are only unique within a shard
    RawEvent {
        id: format!("{}-{}", shard_id, record.sequence_number),
        received_at: record.approximate_arrival,
        attributes,
        body: record.data,
        ack_token: AckToken::Sequence {
            shard_id: shard_id.to_string(),
            sequence_number: record.sequence_number,
        },
    }
}

impl StreamSource for ShardSource {
    fn name(&self) -> &str {
        &self.config.stream_name
    }

    /// One round-robin pass over the shards, starting after the shard polled
    /// last. Returns the first non-empty page; each empty page costs one
    /// backoff delay.
    fn fetch(&mut self) -> Result<Vec<RawEvent>> {
        // A page fetched but never committed is still at-least-once: its
        // position is only saved now, before anything newer is read.
        self.flush_pending();

        let shards = self.shards()?;
        if shards.is_empty() {
            self.backoff();
            return Ok(Vec::new());
        }

        for _ in 0..shards.len() {
            let index = self.next_shard % shards.len();
            self.next_shard = (index + 1) % shards.len();
            let shard = &shards[index];

            let records = self.poll_shard(shard)?;
            tracing::info!(shard_id = %shard.shard_id, count = records.len(), "message count");

            if !records.is_empty() {
                return Ok(records
                    .into_iter()
                    .map(|r| raw_event_from_record(&shard.shard_id, r))
                    .collect());
            }
            self.backoff();
        }

        Ok(Vec::new())
    }

    fn commit(&mut self, events: &[RawEvent]) -> Commit {
        if events.is_empty() {
            return Commit::default();
        }
        if self.flush_pending() {
            Commit {
                acknowledged: events.len(),
                ..Default::default()
            }
        } else {
            Commit {
                failed: events.len(),
                ..Default::default()
            }
        }
    }
}
