//! Per-stage counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the ingest stage
///
/// Every loss the pipeline can inflict is monotone and observable here
/// or in the overflow store's counters; nothing is dropped silently.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    /// Events accepted into the ingest ring
    pub enqueued_events: AtomicU64,

    /// Events refused because the ring was full or closed
    pub dropped_full: AtomicU64,

    /// Events discarded by the category exclusion filter
    pub excluded_events: AtomicU64,

    /// Records encoded and assigned an id
    pub records_ingested: AtomicU64,

    /// Records dropped because the overflow store refused them under
    /// ring pressure
    pub dropped_overflow: AtomicU64,

    /// Switches from direct mode to the overflow path
    pub mode_switches: AtomicU64,

    /// Confirmed switches back to direct mode
    pub mode_restores: AtomicU64,
}

impl IngestMetrics {
    pub fn record_enqueued(&self) {
        self.enqueued_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_full(&self) {
        self.dropped_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_excluded(&self) {
        self.excluded_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ingested(&self) {
        self.records_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_overflow(&self) {
        self.dropped_overflow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mode_switch(&self) {
        self.mode_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mode_restore(&self) {
        self.mode_restores.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of all counters
    pub fn snapshot(&self) -> IngestMetricsSnapshot {
        IngestMetricsSnapshot {
            enqueued_events: self.enqueued_events.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            excluded_events: self.excluded_events.load(Ordering::Relaxed),
            records_ingested: self.records_ingested.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
            mode_switches: self.mode_switches.load(Ordering::Relaxed),
            mode_restores: self.mode_restores.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`IngestMetrics`]
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestMetricsSnapshot {
    pub enqueued_events: u64,
    pub dropped_full: u64,
    pub excluded_events: u64,
    pub records_ingested: u64,
    pub dropped_overflow: u64,
    pub mode_switches: u64,
    pub mode_restores: u64,
}

/// Counters for the transport stage
#[derive(Debug, Default)]
pub struct TransportMetrics {
    /// Records handed to the backend producer
    pub records_sent: AtomicU64,

    /// Opaque send/flush failures reported by the producer
    pub send_failures: AtomicU64,

    /// Completed flush calls
    pub batches_flushed: AtomicU64,

    /// Confirmation messages emitted to the ingest stage
    pub confirmations_sent: AtomicU64,

    /// Heartbeat probes while the backend was not ready
    pub probes: AtomicU64,

    /// Enqueues refused while not ready (or with a full ring)
    pub rejected_records: AtomicU64,

    /// Records abandoned at shutdown with the backend still down
    pub dropped_at_close: AtomicU64,
}

impl TransportMetrics {
    pub fn record_sent(&self) {
        self.records_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_flushed(&self) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confirmation(&self) {
        self.confirmations_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe(&self) {
        self.probes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_at_close(&self, count: u64) {
        self.dropped_at_close.fetch_add(count, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of all counters
    pub fn snapshot(&self) -> TransportMetricsSnapshot {
        TransportMetricsSnapshot {
            records_sent: self.records_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            confirmations_sent: self.confirmations_sent.load(Ordering::Relaxed),
            probes: self.probes.load(Ordering::Relaxed),
            rejected_records: self.rejected_records.load(Ordering::Relaxed),
            dropped_at_close: self.dropped_at_close.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`TransportMetrics`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportMetricsSnapshot {
    pub records_sent: u64,
    pub send_failures: u64,
    pub batches_flushed: u64,
    pub confirmations_sent: u64,
    pub probes: u64,
    pub rejected_records: u64,
    pub dropped_at_close: u64,
}
