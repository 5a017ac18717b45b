//! Replayer
//!
//! Reads a time range back from the archive and republishes each body to a
//! destination queue, one synchronous send per message. A failed fetch,
//! decode or send is logged and counted; the remaining messages are still
//! sent. Overlapping replays publish duplicates.

use std::fmt;
use std::sync::Arc;

use crate::archive::TimeRangeReader;
use crate::config::ReplayConfig;
use crate::error::Result;
use crate::transport::{ObjectStore, QueueClient};
use crate::types::{ArchivedRecord, TimeRange};

/// How a replay ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    Published { published: usize, failed: usize },
    /// Nothing in the archive matched the range
    NoMessagesFound,
}

impl ReplayOutcome {
    pub fn published(&self) -> usize {
        match self {
            ReplayOutcome::Published { published, .. } => *published,
            ReplayOutcome::NoMessagesFound => 0,
        }
    }

    pub fn failed(&self) -> usize {
        match self {
            ReplayOutcome::Published { failed, .. } => *failed,
            ReplayOutcome::NoMessagesFound => 0,
        }
    }
}

impl fmt::Display for ReplayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayOutcome::Published { published, failed: 0 } => {
                write!(f, "published {} messages", published)
            }
            ReplayOutcome::Published { published, failed } => {
                write!(f, "published {} messages, {} failed", published, failed)
            }
            ReplayOutcome::NoMessagesFound => write!(f, "no messages found"),
        }
    }
}

/// Republishes archived events
pub struct Replayer {
    queue: Arc<dyn QueueClient>,
    reader: TimeRangeReader,
    config: ReplayConfig,
}

impl Replayer {
    pub fn new(queue: Arc<dyn QueueClient>, store: Arc<dyn ObjectStore>, config: ReplayConfig) -> Self {
        let reader = match &config.source_name {
            Some(source) => TimeRangeReader::new(store).with_source(source.clone()),
            None => TimeRangeReader::new(store),
        };
        Self {
            queue,
            reader,
            config,
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Replay `YYYY/MM/DD/HH/MM` range ends
    pub fn replay_between(&self, start: &str, end: &str) -> Result<ReplayOutcome> {
        self.replay(&TimeRange::parse(start, end)?)
    }

    /// Republish every archived record in `range`.
    ///
    /// Only listing and key-format failures are returned as errors.
    pub fn replay(&self, range: &TimeRange) -> Result<ReplayOutcome> {
        let destination = self.config.destination_queue.as_str();
        let documents = self.reader.read(&self.config.bucket, range)?;

        let mut published = 0;
        let mut failed = 0;

        for document in documents {
            let record = match document.and_then(|bytes| ArchivedRecord::from_document(&bytes)) {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!(queue = destination, error = %e, "Error replaying");
                    failed += 1;
                    continue;
                }
            };

            if self.config.dry_run {
                tracing::info!(
                    queue = destination,
                    message_id = %record.id,
                    dry_run = true,
                    "publishing message to queue"
                );
                published += 1;
                continue;
            }

            tracing::info!(queue = destination, message_id = %record.id, "publishing message to queue");
            match self.queue.send(destination, &record.body) {
                Ok(receipt) => {
                    tracing::debug!(
                        queue = destination,
                        message_id = %record.id,
                        new_message_id = %receipt.message_id,
                        "message published"
                    );
                    published += 1;
                }
                Err(e) => {
                    tracing::error!(
                        queue = destination,
                        message_id = %record.id,
                        error = %e,
                        "Error replaying"
                    );
                    failed += 1;
                }
            }
        }

        if published == 0 && failed == 0 {
            tracing::info!(queue = destination, "No messages found");
            return Ok(ReplayOutcome::NoMessagesFound);
        }

        tracing::info!(
            queue = destination,
            failed,
            dry_run = self.config.dry_run,
            "Successfully published {} messages to queue",
            published
        );
        Ok(ReplayOutcome::Published { published, failed })
    }
}
