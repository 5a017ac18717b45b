//! Utility functions and helpers
//!
//! Timestamp formatting for archive partitions and atomic file writes.

pub mod atomic;
pub mod time;

pub use atomic::{atomic_write, cleanup_temp_files};
pub use time::{format_minute, now_utc, parse_epoch, parse_minute, truncate_to_minute};
