//! Protocol error types

use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors from record construction and id generation
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Shard id outside the 10-bit range
    #[error("shard id {0} out of range (must be < 1024)")]
    ShardOutOfRange(u64),
}
