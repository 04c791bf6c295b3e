//! The ferry pipeline: ingest, transport, and the mode switch
//!
//! Wires the protocol primitives, the ring buffers and the overflow
//! store into a running pipeline:
//!
//! ```text
//! app threads ──► ingest ring ──► ingest consumer ──► transport ring ──► MQ
//!                                      │    ▲
//!                                      ▼    │ (replay)
//!                                 overflow store ──► disk
//! ```
//!
//! The ingest consumer owns the total order and the Direct/ViaOverflow
//! mode; the transport consumer owns the backend producer and reports
//! delivery progress back over a control channel. See [`Pipeline`] for
//! the assembled handle.

mod error;
mod ingest;
mod metrics;
mod pipeline;
mod producer;
mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{PipelineError, Result};
pub use ingest::{IngestStage, Mode};
pub use metrics::{
    IngestMetrics, IngestMetricsSnapshot, TransportMetrics, TransportMetricsSnapshot,
};
pub use pipeline::Pipeline;
pub use producer::MqProducer;
pub use transport::TransportStage;
