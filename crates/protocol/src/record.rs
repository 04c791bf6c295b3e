//! The unit of work that flows through the pipeline
//!
//! A `Record` is created once per accepted log event and carries a pooled
//! payload buffer. The buffer is reused across records via [`RecordPool`],
//! but is never shared between two in-flight records.

use bytes::BytesMut;

/// An ordered, encoded log event
///
/// The pipeline only requires "an id, a byte payload, a length" - the
/// payload contents are opaque (produced by a [`crate::RecordCodec`]).
#[derive(Debug)]
pub struct Record {
    /// Total-order id assigned by the ingest stage
    id: u64,

    /// Encoded event bytes (pooled, exclusively owned)
    payload: BytesMut,
}

impl Record {
    /// Create a record from an id and an encoded payload
    #[inline]
    pub fn new(id: u64, payload: BytesMut) -> Self {
        Self { id, payload }
    }

    /// The record's total-order id
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Encoded payload bytes
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Overwrite the record in place for pooled reuse
    pub fn reset(&mut self, id: u64) {
        self.id = id;
        self.payload.clear();
    }

    /// Mutable access to the payload buffer (for codecs)
    #[inline]
    pub fn payload_mut(&mut self) -> &mut BytesMut {
        &mut self.payload
    }

    /// Consume the record, releasing its payload buffer back to a pool
    #[inline]
    pub fn into_payload(self) -> BytesMut {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_fields() {
        let mut payload = BytesMut::with_capacity(64);
        payload.extend_from_slice(b"hello");

        let rec = Record::new(42, payload);
        assert_eq!(rec.id(), 42);
        assert_eq!(rec.len(), 5);
        assert_eq!(rec.payload(), b"hello");
        assert!(!rec.is_empty());
    }

    #[test]
    fn test_reset_clears_payload_and_overwrites_id() {
        let mut payload = BytesMut::new();
        payload.extend_from_slice(b"old");

        let mut rec = Record::new(1, payload);
        rec.reset(2);

        assert_eq!(rec.id(), 2);
        assert!(rec.is_empty());
    }

    #[test]
    fn test_into_payload_keeps_capacity() {
        let payload = BytesMut::with_capacity(1024);
        let rec = Record::new(7, payload);

        let buf = rec.into_payload();
        assert!(buf.capacity() >= 1024);
    }
}
