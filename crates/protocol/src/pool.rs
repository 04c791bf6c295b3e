//! Lock-free free-list of reusable payload buffers
//!
//! Payload buffers are taken from the pool at ingest time and returned
//! once the record has been fully handed off. The pool bounds its own
//! memory two ways: a fixed free-list capacity, and a size ceiling -
//! a buffer that grew past `max_pooled_capacity` is not returned, so the
//! next allocation starts again at the default size. This reproduces the
//! "shrink back under memory pressure" behavior of a GC-managed pool with
//! an explicit free list.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

/// Ratio applied to the buffer capacity to get the pooling ceiling
const OVERSIZE_FACTOR: usize = 4;

/// Pool of reusable `BytesMut` payload buffers
pub struct RecordPool {
    /// Lock-free queue of available buffers
    queue: ArrayQueue<BytesMut>,

    /// Capacity each fresh buffer is allocated with
    buffer_capacity: usize,

    /// Buffers that grew beyond this are dropped instead of pooled
    max_pooled_capacity: usize,

    /// Metrics
    metrics: PoolMetrics,
}

/// Metrics for pool monitoring
#[derive(Debug, Default)]
struct PoolMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    returns: AtomicU64,
    drops: AtomicU64,
}

/// Point-in-time snapshot of pool metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub returns: u64,
    pub drops: u64,
}

impl RecordPool {
    /// Create a pool of `pool_size` buffers of `buffer_capacity` bytes each
    pub fn new(pool_size: usize, buffer_capacity: usize) -> Self {
        let queue = ArrayQueue::new(pool_size.max(1));

        for _ in 0..queue.capacity() {
            let _ = queue.push(BytesMut::with_capacity(buffer_capacity));
        }

        Self {
            queue,
            buffer_capacity,
            max_pooled_capacity: buffer_capacity.saturating_mul(OVERSIZE_FACTOR),
            metrics: PoolMetrics::default(),
        }
    }

    /// Get a buffer, allocating a fresh one if the pool is empty
    #[inline]
    pub fn get(&self) -> BytesMut {
        match self.queue.pop() {
            Some(buf) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                BytesMut::with_capacity(self.buffer_capacity)
            }
        }
    }

    /// Return a buffer to the pool
    ///
    /// The buffer is cleared first. Buffers that grew beyond the pooling
    /// ceiling (or arrive when the free list is full) are dropped.
    #[inline]
    pub fn put(&self, mut buf: BytesMut) {
        buf.clear();

        if buf.capacity() > self.max_pooled_capacity {
            self.metrics.drops.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match self.queue.push(buf) {
            Ok(()) => {
                self.metrics.returns.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.metrics.drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of buffers currently available
    #[inline]
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    /// Default capacity of a fresh buffer
    #[inline]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Snapshot pool metrics
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            returns: self.metrics.returns.load(Ordering::Relaxed),
            drops: self.metrics.drops.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RecordPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordPool")
            .field("available", &self.available())
            .field("buffer_capacity", &self.buffer_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_preallocates() {
        let pool = RecordPool::new(8, 256);
        assert_eq!(pool.available(), 8);
        assert_eq!(pool.buffer_capacity(), 256);
    }

    #[test]
    fn test_get_put_roundtrip() {
        let pool = RecordPool::new(2, 128);

        let mut buf = pool.get();
        buf.extend_from_slice(b"payload");
        pool.put(buf);

        let buf = pool.get();
        assert!(buf.is_empty(), "returned buffer must be cleared");

        let m = pool.metrics();
        assert_eq!(m.hits, 2);
        assert_eq!(m.returns, 1);
    }

    #[test]
    fn test_empty_pool_allocates() {
        let pool = RecordPool::new(1, 64);
        let _a = pool.get();
        let b = pool.get();

        assert!(b.capacity() >= 64);
        assert_eq!(pool.metrics().misses, 1);
    }

    #[test]
    fn test_oversized_buffer_is_not_pooled() {
        let pool = RecordPool::new(4, 64);

        let _hole = pool.get();
        let big = BytesMut::with_capacity(64 * OVERSIZE_FACTOR + 1);
        pool.put(big);

        // The oversized buffer was dropped, not returned.
        assert_eq!(pool.available(), 3);
        assert_eq!(pool.metrics().drops, 1);

        // The next get after exhaustion reallocates at the default size.
        let _b1 = pool.get();
        let _b2 = pool.get();
        let _b3 = pool.get();
        let fresh = pool.get();
        assert!(fresh.capacity() < 64 * OVERSIZE_FACTOR);
    }

    #[test]
    fn test_full_pool_drops_returns() {
        let pool = RecordPool::new(1, 64);

        let extra = BytesMut::with_capacity(64);
        pool.put(extra);

        assert_eq!(pool.available(), 1);
        assert_eq!(pool.metrics().drops, 1);
    }
}
