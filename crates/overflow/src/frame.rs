//! In-memory frame buffer for the double-buffered write path
//!
//! Records are stored back to back as frames:
//!
//! ```text
//! [8-byte id (big-endian)][4-byte length (big-endian)][payload]
//! ```
//!
//! The same framing is used inside on-disk blocks, so a buffer's unread
//! region can be handed to the disk writer byte-for-byte.

use bytes::BytesMut;

/// Size of the per-frame header: id plus length field
pub const FRAME_HEADER: usize = 8 + 4;

/// A buffer of framed records with a read position
///
/// Serves as the active/standby write buffers and as the read-side head
/// buffer. Not thread-safe; owned by the store's caller thread or (while
/// a write is in flight) by the disk-writer thread.
#[derive(Debug)]
pub struct FrameBuffer {
    data: BytesMut,
    read_pos: usize,
    unread: usize,
    capacity: usize,
}

impl FrameBuffer {
    /// Create an empty buffer with the given soft capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            read_pos: 0,
            unread: 0,
            capacity,
        }
    }

    /// Rebuild a buffer around recycled backing storage
    pub fn from_recycled(mut data: BytesMut, capacity: usize) -> Self {
        data.clear();
        Self {
            data,
            read_pos: 0,
            unread: 0,
            capacity,
        }
    }

    /// Fill the buffer from a decompressed block of `records` frames
    pub fn load_block(&mut self, block: &[u8], records: usize) {
        debug_assert!(self.unread == 0, "loading over unread frames");
        self.data.clear();
        self.data.extend_from_slice(block);
        self.read_pos = 0;
        self.unread = records;
    }

    /// Append one frame if it fits
    ///
    /// A frame that would exceed the soft capacity is refused unless the
    /// buffer is empty: an oversized record then occupies the buffer
    /// alone (the backing storage grows, and is shed on recycling).
    pub fn try_append(&mut self, id: u64, payload: &[u8]) -> bool {
        let frame_len = FRAME_HEADER + payload.len();
        if self.data.len() + frame_len > self.capacity && !self.data.is_empty() {
            return false;
        }

        self.data.extend_from_slice(&id.to_be_bytes());
        self.data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        self.data.extend_from_slice(payload);
        self.unread += 1;
        true
    }

    /// Peek at the frame at the read position
    pub fn peek(&self) -> Option<(u64, &[u8])> {
        if self.unread == 0 {
            return None;
        }

        let buf = &self.data[self.read_pos..];
        let id = u64::from_be_bytes(buf[0..8].try_into().expect("frame header"));
        let len = u32::from_be_bytes(buf[8..12].try_into().expect("frame header")) as usize;
        Some((id, &buf[FRAME_HEADER..FRAME_HEADER + len]))
    }

    /// Consume the frame at the read position, returning its payload length
    ///
    /// Resets to an empty buffer once every frame has been consumed.
    pub fn advance(&mut self) -> Option<usize> {
        if self.unread == 0 {
            return None;
        }

        let buf = &self.data[self.read_pos..];
        let len = u32::from_be_bytes(buf[8..12].try_into().expect("frame header")) as usize;
        self.read_pos += FRAME_HEADER + len;
        self.unread -= 1;

        if self.unread == 0 {
            self.reset();
        }
        Some(len)
    }

    /// Number of frames not yet consumed
    #[inline]
    pub fn unread(&self) -> usize {
        self.unread
    }

    /// Whether any unread frames remain
    #[inline]
    pub fn has_unread(&self) -> bool {
        self.unread > 0
    }

    /// The not-yet-consumed byte region (what a flush writes out)
    #[inline]
    pub fn unread_bytes(&self) -> &[u8] {
        &self.data[self.read_pos..]
    }

    /// Clear all content, keeping the backing storage
    pub fn reset(&mut self) {
        self.data.clear();
        self.read_pos = 0;
        self.unread = 0;
    }

    /// Tear the buffer down to its parts for a flush handoff
    ///
    /// Returns the backing storage trimmed to the unread region, plus the
    /// unread frame count, leaving the buffer logically empty with no
    /// backing storage (pair with [`FrameBuffer::from_recycled`]).
    pub fn take_unread(&mut self) -> (BytesMut, usize) {
        let mut data = std::mem::take(&mut self.data);
        let _ = data.split_to(self.read_pos);
        let records = self.unread;
        self.read_pos = 0;
        self.unread = 0;
        (data, records)
    }
}
