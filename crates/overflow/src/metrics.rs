//! Overflow store counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one overflow store
///
/// Shared as an `Arc` so callers can observe the store while its owning
/// thread runs. All counters are monotone except the two `queued_*`
/// gauges.
#[derive(Debug, Default)]
pub struct OverflowMetrics {
    /// Records accepted by `enqueue`
    pub enqueued_records: AtomicU64,

    /// Records consumed through `peek`/`advance`
    pub dequeued_records: AtomicU64,

    /// Enqueues refused by the byte budget
    pub rejected_records: AtomicU64,

    /// Records queued across memory and disk (gauge)
    pub queued_records: AtomicU64,

    /// Payload bytes counted against the budget (gauge)
    pub queued_bytes: AtomicU64,

    /// Records lost to pruning, corruption or failed writes
    pub dropped_records: AtomicU64,

    /// Sealed segments deleted to stay within the segment bound
    pub pruned_segments: AtomicU64,

    /// Blocks flushed to disk
    pub spilled_blocks: AtomicU64,
}

impl OverflowMetrics {
    /// Take a point-in-time copy of all counters
    pub fn snapshot(&self) -> OverflowMetricsSnapshot {
        OverflowMetricsSnapshot {
            enqueued_records: self.enqueued_records.load(Ordering::Relaxed),
            dequeued_records: self.dequeued_records.load(Ordering::Relaxed),
            rejected_records: self.rejected_records.load(Ordering::Relaxed),
            queued_records: self.queued_records.load(Ordering::Relaxed),
            queued_bytes: self.queued_bytes.load(Ordering::Relaxed),
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
            pruned_segments: self.pruned_segments.load(Ordering::Relaxed),
            spilled_blocks: self.spilled_blocks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`OverflowMetrics`]
#[derive(Debug, Clone, Copy, Default)]
pub struct OverflowMetricsSnapshot {
    pub enqueued_records: u64,
    pub dequeued_records: u64,
    pub rejected_records: u64,
    pub queued_records: u64,
    pub queued_bytes: u64,
    pub dropped_records: u64,
    pub pruned_segments: u64,
    pub spilled_blocks: u64,
}
