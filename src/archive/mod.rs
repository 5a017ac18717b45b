//! Event archive
//!
//! The writer groups consumed events by minute and stores each one under
//! `{source}/{YYYY}/{MM}/{DD}/{HH}/{mm}/{id}`. The reader lists the smallest
//! prefix covering a time range and yields the matching documents.

mod reader;
mod writer;

pub use reader::{key_timestamp, ArchiveIter, TimeRangeReader};
pub use writer::{ArchiveWriter, FlushReport};

/// Listing prefix for a source name and a date prefix
pub(crate) fn source_prefix(source: Option<&str>, date_prefix: &str) -> String {
    match source {
        Some(source) if !source.is_empty() => {
            format!("{}/{}", source.trim_end_matches('/'), date_prefix)
        }
        _ => date_prefix.to_string(),
    }
}
