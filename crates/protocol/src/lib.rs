//! Record model and id generation for the ferry pipeline
//!
//! This crate defines the data that flows through the pipeline:
//!
//! - [`Record`] - an id plus a pooled byte payload
//! - [`SequenceGenerator`] - time-partitioned 64-bit record ids
//! - [`RecordPool`] - free-list of reusable payload buffers
//! - [`RecordCodec`] / [`LogEvent`] - the contract with the host logging
//!   framework (the pipeline never interprets event contents)
//! - [`ControlMessage`] - the transport-to-ingest confirmation feedback

mod codec;
mod control;
mod error;
mod pool;
mod record;
mod sequence;

pub use codec::{LogEvent, RawCodec, RawEvent, RecordCodec};
pub use control::ControlMessage;
pub use error::{ProtocolError, Result};
pub use pool::{PoolMetricsSnapshot, RecordPool};
pub use record::Record;
pub use sequence::{millis, seq, shard_id, SequenceGenerator, MAX_SEQ, MAX_SHARD};
