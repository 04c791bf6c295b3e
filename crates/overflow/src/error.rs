//! Overflow store error types

use std::io;
use thiserror::Error;

/// Result type for overflow store operations
pub type Result<T> = std::result::Result<T, OverflowError>;

/// Errors from the overflow store internals
///
/// None of these reach the application thread that logged the original
/// event; the store retries, counts or bounds every failure. They exist
/// for the disk-writer internals and for `close()`.
#[derive(Debug, Error)]
pub enum OverflowError {
    /// Segment or index file I/O failed
    #[error("overflow I/O error: {0}")]
    Io(#[from] io::Error),

    /// A block failed to decompress or had an impossible header
    #[error("corrupt block in segment {file_index} at offset {offset}")]
    CorruptBlock { file_index: u64, offset: u64 },
}
