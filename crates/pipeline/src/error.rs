//! Pipeline error types
//!
//! These surface only at assembly and shutdown; nothing on the hot path
//! returns an error to the application thread (failures there are
//! counted and logged instead).

use std::io;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors from pipeline assembly and teardown
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration failed validation
    #[error("configuration error: {0}")]
    Config(#[from] ferry_config::ConfigError),

    /// The configuration disables the pipeline
    #[error("pipeline is disabled by configuration")]
    Disabled,

    /// Invalid shard for the sequence generator
    #[error(transparent)]
    Protocol(#[from] ferry_protocol::ProtocolError),

    /// Overflow store failed to open or close
    #[error("overflow store error: {0}")]
    Overflow(#[from] ferry_overflow::OverflowError),

    /// A worker thread could not be spawned
    #[error("failed to spawn {thread} thread: {source}")]
    Spawn {
        /// Which worker
        thread: &'static str,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
}
