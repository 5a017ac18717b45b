//! Stream sources
//!
//! A source turns transport deliveries into `RawEvent`s and knows how to
//! acknowledge them afterwards:
//!
//! ```text
//! Queue:  IDLE ─► FETCHING ─► EMPTY | DELIVERING ─► ACK_PENDING ─► IDLE
//! Shard:  NO_CURSOR ─► ITERATOR_REQUESTED ─► POLLING ─► HAS_RECORDS | EMPTY_BACKOFF ─► POLLING
//! ```
//!
//! Acknowledgement is never fatal. A failed delete or checkpoint write only
//! means the events will be delivered again.

mod queue;
mod shard;

pub use queue::{raw_event_from_message, QueueSource, QueueState};
pub use shard::{ShardSource, ShardState, PARTITION_KEY_ATTRIBUTE, SHARD_ID_ATTRIBUTE};

use crate::error::Result;
use crate::types::RawEvent;

/// Outcome of acknowledging one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Commit {
    /// Events removed from the queue or covered by a saved checkpoint
    pub acknowledged: usize,
    /// Events whose acknowledgement failed and will be redelivered
    pub failed: usize,
    /// Events left in place on purpose (deletes disabled)
    pub skipped: usize,
}

/// A partitioned event stream the consumer loop can drive
pub trait StreamSource {
    /// Queue or stream name
    fn name(&self) -> &str;

    /// Fetch the next batch, possibly empty.
    ///
    /// Transport errors are transient; typed shard errors are fatal to the
    /// current polling pass.
    fn fetch(&mut self) -> Result<Vec<RawEvent>>;

    /// Acknowledge a batch previously returned by `fetch`
    fn commit(&mut self, events: &[RawEvent]) -> Commit;
}
