//! Consumer loop counters

use serde::Serialize;

use crate::archive::FlushReport;
use crate::source::Commit;

/// Running totals of one consumer loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    /// Non-empty batches processed
    pub batches: u64,
    /// Events handed to the sink
    pub events: u64,
    /// Events written to the archive
    pub archived: u64,
    pub archive_failures: u64,
    /// Events deleted or checkpointed
    pub acknowledged: u64,
    pub ack_failures: u64,
    /// Events deliberately left on the queue
    pub ack_skipped: u64,
    /// Fetch failures the loop carried on after
    pub transient_errors: u64,
}

impl ConsumerStats {
    pub(crate) fn record_flush(&mut self, report: FlushReport) {
        self.archived += report.written as u64;
        self.archive_failures += report.failed as u64;
    }

    pub(crate) fn record_commit(&mut self, commit: Commit) {
        self.acknowledged += commit.acknowledged as u64;
        self.ack_failures += commit.failed as u64;
        self.ack_skipped += commit.skipped as u64;
    }
}
