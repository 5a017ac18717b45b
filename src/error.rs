//! Error types for the consumption, archival and replay engine
//!
//! Two layers:
//! - `TransportError`: a single capability call failed (queue, shard log,
//!   object store). The engine treats these as transient.
//! - `EventReplayError`: everything the engine itself raises, including the
//!   typed shard-consumer failures and archive corruption.

use thiserror::Error;

/// Result type for capability calls
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EventReplayError>;

/// Errors raised by a transport capability
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Queue does not exist
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// Stream or shard does not exist
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// Ack tokens unknown or already used; the rest of the batch went through
    #[error("invalid ack tokens: {}", .0.join(", "))]
    InvalidAckTokens(Vec<String>),

    /// Iterator token could not be decoded or points past the shard
    #[error("invalid iterator: {0}")]
    InvalidIterator(String),

    /// Object key not present in the bucket
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    /// Any other failed request
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },
}

impl TransportError {
    /// Shorthand for a generic request failure
    pub fn request(operation: &'static str, message: impl Into<String>) -> Self {
        TransportError::Request {
            operation,
            message: message.into(),
        }
    }
}

/// Errors raised by the engine
#[derive(Error, Debug)]
pub enum EventReplayError {
    /// Transient transport failure (fetch/send/list/get)
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Shard iterator could not be acquired
    #[error("failed to acquire iterator for shard {shard_id}: {source}")]
    IteratorAcquisition {
        shard_id: String,
        #[source]
        source: TransportError,
    },

    /// Shard page fetch failed
    #[error("failed to fetch records from shard {shard_id}: {source}")]
    RecordFetch {
        shard_id: String,
        #[source]
        source: TransportError,
    },

    /// Archived object key carries no well-formed timestamp segment
    #[error("invalid archive key, no timestamp segment: {0}")]
    KeyFormat(String),

    /// Timestamp string does not match YYYY/MM/DD/HH/MM
    #[error("invalid timestamp '{0}', expected YYYY/MM/DD/HH/MM")]
    InvalidTimestamp(String),

    /// Time range with start after end
    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },

    /// Archived document could not be decoded
    #[error("failed to decode archived record: {0}")]
    Decode(String),

    /// Record could not be serialized into an archive document
    #[error("failed to encode archived record: {0}")]
    Encode(#[source] serde_json::Error),

    /// Unknown action selector (consume / replay)
    #[error("action not implemented: {0}")]
    UnknownAction(String),

    /// Unknown stream-type selector (queue / shard)
    #[error("unknown stream type: {0}")]
    UnknownStreamType(String),

    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl EventReplayError {
    /// Whether the consumer loop must stop on this error.
    ///
    /// Transport errors are transient and the loop keeps polling; everything
    /// else needs an operator.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EventReplayError::Transport(_))
    }
}
