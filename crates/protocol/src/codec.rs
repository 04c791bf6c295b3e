//! The contract between the pipeline and the host logging framework
//!
//! The pipeline treats upstream events as opaque: it needs a
//! logger-category string for self-exclusion filtering, and a way to turn
//! the event into payload bytes. Concrete encoders (JSON and friends)
//! live with the host integration, not here.

use bytes::BytesMut;

/// An opaque loggable event supplied by the host framework
pub trait LogEvent: Send + 'static {
    /// Logger category the event originated from
    ///
    /// Used to drop events emitted by the pipeline's own internals before
    /// they can feed back into the pipeline.
    fn category(&self) -> &str;
}

/// Converts an upstream event into a byte payload
///
/// Implementations append the encoded form to `buf`; the buffer arrives
/// cleared and pooled. The codec runs on the single ingest consumer
/// thread, so it may keep internal scratch state.
pub trait RecordCodec<E: LogEvent>: Send {
    /// Encode `event` into `buf`
    fn encode(&mut self, event: &E, buf: &mut BytesMut);
}

/// Pass-through codec for events that already are byte slices
///
/// Mostly useful in tests and embeddings that pre-encode upstream.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

/// A pre-encoded event: raw bytes plus a category
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub category: String,
    pub bytes: Vec<u8>,
}

impl LogEvent for RawEvent {
    fn category(&self) -> &str {
        &self.category
    }
}

impl RecordCodec<RawEvent> for RawCodec {
    fn encode(&mut self, event: &RawEvent, buf: &mut BytesMut) {
        buf.extend_from_slice(&event.bytes);
    }
}
