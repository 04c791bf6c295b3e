//! The message-queue backend seam
//!
//! The pipeline never interprets backend errors; every call reports an
//! opaque success/failure signal that feeds the transport stage's
//! failure counter and readiness flag.

use ferry_protocol::Record;

/// A producer for the downstream message queue
///
/// Implementations wrap a concrete MQ client. All methods are called
/// from the transport consumer thread only, so `&mut self` access is
/// uncontended.
pub trait MqProducer: Send + 'static {
    /// Attempt to (re)establish the backend connection
    fn connect(&mut self) -> bool;

    /// Whether the last known connection state was healthy
    fn is_connected(&self) -> bool;

    /// Send one record; `false` is an opaque failure signal
    fn send(&mut self, record: &Record) -> bool;

    /// Flush buffered sends to the backend
    fn flush(&mut self) -> bool;

    /// Release the connection
    fn close(&mut self);
}
