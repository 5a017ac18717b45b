//! Data types shared by sources, the archive and the replayer

mod body;
mod cursor;
mod event;
mod range;
mod record;

pub use body::{decode_body, encode_body, BodyEncoding};
pub use cursor::{IteratorMode, ShardCursor, StreamPosition};
pub use event::{AckToken, RawEvent, SENT_TIMESTAMP};
pub use range::{common_segment_prefix, PartitionKey, TimeRange};
pub use record::ArchivedRecord;
