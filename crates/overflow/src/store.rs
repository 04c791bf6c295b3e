//! The overflow store: double-buffered writes over rotating segments

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Receiver, Sender};
use ferry_protocol::Record;
use parking_lot::Mutex;

use crate::error::{OverflowError, Result};
use crate::frame::{FrameBuffer, FRAME_HEADER};
use crate::metrics::{OverflowMetrics, OverflowMetricsSnapshot};
use crate::segment::{self, SegmentSet, SegmentWriter, Shared, WriteDone, WriteJob, WriterMsg};

/// Overflow store settings
#[derive(Debug, Clone)]
pub struct OverflowConfig {
    /// Folder holding segment files and the cursor index
    pub dir: PathBuf,

    /// File name prefix for segments (`<prefix>-<index>.log`)
    pub prefix: String,

    /// Total queued payload bytes before new records are rejected
    pub capacity_bytes: u64,

    /// Soft size of each coalescing buffer; one buffer makes one block
    pub buffer_capacity: usize,

    /// Byte size at which a segment file is sealed and rotated
    pub segment_capacity: u64,

    /// Sealed segments kept on disk before the oldest is pruned
    pub max_segments: usize,
}

impl OverflowConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: "overflow".to_string(),
            capacity_bytes: 256 * 1024 * 1024,
            buffer_capacity: 1024 * 1024,
            segment_capacity: 64 * 1024 * 1024,
            max_segments: 8,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_capacity_bytes(mut self, bytes: u64) -> Self {
        self.capacity_bytes = bytes;
        self
    }

    pub fn with_buffer_capacity(mut self, bytes: usize) -> Self {
        self.buffer_capacity = bytes.max(FRAME_HEADER);
        self
    }

    pub fn with_segment_capacity(mut self, bytes: u64) -> Self {
        self.segment_capacity = bytes;
        self
    }

    pub fn with_max_segments(mut self, count: usize) -> Self {
        self.max_segments = count.max(1);
        self
    }
}

/// Disk-backed FIFO queue of records
///
/// Single caller thread. Writes coalesce into `active`; when it fills,
/// its contents are handed to the disk-writer thread and `standby`
/// becomes the new `active`. While the write is in flight `standby` is
/// `None` - a second fill blocks until the completion arrives, which
/// bounds memory to two buffers plus one block in transit.
pub struct OverflowStore {
    shared: Arc<Shared>,
    active: FrameBuffer,
    standby: Option<FrameBuffer>,
    head: FrameBuffer,
    buffer_capacity: usize,
    capacity_bytes: u64,
    jobs: Sender<WriterMsg>,
    completions: Receiver<WriteDone>,
    writer: Option<JoinHandle<()>>,
    closed: bool,
}

impl OverflowStore {
    /// Open the store, recovering any segments left by a previous run
    pub fn open(config: OverflowConfig) -> Result<Self> {
        let set = SegmentSet::recover(&config.dir, &config.prefix)?;

        let mut queued_records = 0u64;
        let mut queued_bytes = 0u64;
        for meta in &set.segments {
            queued_records += meta.records;
            queued_bytes += meta.payload_bytes;
        }

        // Head frames parked by the previous close are older than every
        // recovered block and replay first.
        let mut head = FrameBuffer::new(config.buffer_capacity);
        if let Some((frames, records)) = segment::take_resume(&config.dir, &config.prefix)? {
            queued_records += records;
            queued_bytes += frames.len() as u64 - records * FRAME_HEADER as u64;
            head.load_block(&frames, records as usize);
        }

        let metrics = Arc::new(OverflowMetrics::default());
        metrics.queued_records.store(queued_records, Ordering::Relaxed);
        metrics.queued_bytes.store(queued_bytes, Ordering::Relaxed);

        let shared = Arc::new(Shared {
            set: Mutex::new(set),
            metrics,
        });

        let (job_tx, job_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);

        let writer = SegmentWriter::new(
            Arc::clone(&shared),
            job_rx,
            done_tx,
            config.segment_capacity,
            config.max_segments,
        );
        let handle = std::thread::Builder::new()
            .name("ferry-overflow-writer".to_string())
            .spawn(move || writer.run())?;

        tracing::info!(
            dir = %config.dir.display(),
            recovered_records = queued_records,
            "overflow store opened"
        );

        Ok(Self {
            shared,
            active: FrameBuffer::new(config.buffer_capacity),
            standby: Some(FrameBuffer::new(config.buffer_capacity)),
            head,
            buffer_capacity: config.buffer_capacity,
            capacity_bytes: config.capacity_bytes,
            jobs: job_tx,
            completions: done_rx,
            writer: Some(handle),
            closed: false,
        })
    }

    /// Append a record, or refuse it when the byte budget is exhausted
    ///
    /// Never blocks on disk except when both coalescing buffers are full
    /// with a write already in flight.
    pub fn enqueue(&mut self, record: &Record) -> bool {
        if self.closed {
            return false;
        }

        let m = &self.shared.metrics;
        let payload_len = record.len() as u64;
        if m.queued_bytes.load(Ordering::Relaxed) + payload_len > self.capacity_bytes {
            m.rejected_records.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        // Reclaim a finished write opportunistically so the next flush
        // does not have to block for it.
        self.reclaim_completion(false);

        if !self.active.try_append(record.id(), record.payload()) {
            self.flush_active();
            // A fresh buffer always takes the frame (oversize exception).
            self.active.try_append(record.id(), record.payload());
        }

        let m = &self.shared.metrics;
        m.queued_records.fetch_add(1, Ordering::Relaxed);
        m.queued_bytes.fetch_add(payload_len, Ordering::Relaxed);
        m.enqueued_records.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// The oldest queued record, without consuming it
    pub fn peek(&mut self) -> Option<(u64, &[u8])> {
        self.fill_head();
        self.head.peek()
    }

    /// Consume the record last returned by [`OverflowStore::peek`]
    pub fn advance(&mut self) {
        if let Some(len) = self.head.advance() {
            let m = &self.shared.metrics;
            m.queued_records.fetch_sub(1, Ordering::Relaxed);
            m.queued_bytes.fetch_sub(len as u64, Ordering::Relaxed);
            m.dequeued_records.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records queued across memory and disk
    pub fn len(&self) -> u64 {
        self.shared.metrics.queued_records.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued payload bytes counted against the budget
    pub fn queued_bytes(&self) -> u64 {
        self.shared.metrics.queued_bytes.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> OverflowMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// A counter handle that stays readable while the store's owning
    /// thread runs
    pub fn metrics_handle(&self) -> Arc<OverflowMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    /// Flush buffered records to disk and stop the writer thread
    ///
    /// Unconsumed head frames are parked in a resume file that the next
    /// open hands out ahead of any blocks still on disk; the open write
    /// buffer spills to a segment as usual.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.reclaim_completion(true);
        if self.head.has_unread() {
            let (data, records) = self.head.take_unread();
            self.persist_head(data, records);
        }
        if self.active.has_unread() {
            let (data, records) = self.active.take_unread();
            self.spill_blocking(data, records);
        }

        let _ = self.jobs.send(WriterMsg::Close);
        if let Some(handle) = self.writer.take() {
            if handle.join().is_err() {
                tracing::error!("overflow disk writer panicked");
            }
        }

        let snapshot = self.metrics();
        tracing::debug!(
            enqueued = snapshot.enqueued_records,
            dequeued = snapshot.dequeued_records,
            queued = snapshot.queued_records,
            "overflow store closed"
        );
        Ok(())
    }

    /// Park close-time head frames for the next open
    ///
    /// They are the oldest queued records; appending them to a segment
    /// would replay them after everything already on disk.
    fn persist_head(&mut self, data: bytes::BytesMut, records: usize) {
        let payload_bytes = data.len() as u64 - (records * FRAME_HEADER) as u64;
        let (dir, prefix) = {
            let set = self.shared.set.lock();
            (set.dir.clone(), set.prefix.clone())
        };
        if let Err(e) = segment::write_resume(&dir, &prefix, &data, records as u64) {
            tracing::error!(error = %e, records, "failed to park head frames");
            let m = &self.shared.metrics;
            m.dropped_records.fetch_add(records as u64, Ordering::Relaxed);
            m.queued_records.fetch_sub(records as u64, Ordering::Relaxed);
            m.queued_bytes.fetch_sub(payload_bytes, Ordering::Relaxed);
        }
    }

    /// Hand one buffer's unread region to the writer and wait for it
    fn spill_blocking(&mut self, data: bytes::BytesMut, records: usize) {
        let payload_bytes = data.len() as u64 - (records * FRAME_HEADER) as u64;
        let job = WriteJob {
            data,
            records: records as u64,
            payload_bytes,
        };
        self.standby = None;
        if self.jobs.send(WriterMsg::Write(job)).is_ok() {
            self.reclaim_completion(true);
        }
    }

    /// Move the active buffer's contents toward the read side
    ///
    /// Fast path: with nothing on disk, no write in flight and an empty
    /// head, the buffers just swap - no copy, no disk touch. Otherwise
    /// the unread region becomes a write job and the standby buffer
    /// takes over as active.
    fn flush_active(&mut self) {
        if !self.active.has_unread() {
            return;
        }

        let disk_empty = {
            let set = self.shared.set.lock();
            !set.segments.iter().any(|m| m.has_unread())
        };
        if disk_empty && self.standby.is_some() && !self.head.has_unread() {
            std::mem::swap(&mut self.active, &mut self.head);
            return;
        }

        self.reclaim_completion(true);
        let (data, records) = self.active.take_unread();
        let payload_bytes = data.len() as u64 - (records * FRAME_HEADER) as u64;
        let job = WriteJob {
            data,
            records: records as u64,
            payload_bytes,
        };

        self.active = self
            .standby
            .take()
            .unwrap_or_else(|| FrameBuffer::new(self.buffer_capacity));
        if self.jobs.send(WriterMsg::Write(job)).is_err() {
            // Writer gone; the job's records were never written. Counted
            // as dropped here since the writer cannot.
            tracing::error!(records, "overflow writer unavailable, block dropped");
            let m = &self.shared.metrics;
            m.dropped_records.fetch_add(records as u64, Ordering::Relaxed);
            m.queued_records.fetch_sub(records as u64, Ordering::Relaxed);
            m.queued_bytes.fetch_sub(payload_bytes, Ordering::Relaxed);
        }
    }

    /// Refill the head buffer from the oldest queued data
    ///
    /// Order of preference keeps FIFO intact: disk blocks first, then an
    /// in-flight write (await it, then re-check disk), and only with the
    /// disk empty the active buffer is swapped in directly.
    fn fill_head(&mut self) {
        loop {
            if self.head.has_unread() {
                return;
            }

            match segment::read_next_block(&self.shared) {
                Ok(Some((frames, records))) => {
                    self.head.load_block(&frames, records as usize);
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    let file_index = match e {
                        OverflowError::CorruptBlock { file_index, .. } => {
                            tracing::error!(segment = file_index, "corrupt block encountered");
                            Some(file_index)
                        }
                        other => {
                            tracing::error!(error = %other, "segment read failed");
                            let set = self.shared.set.lock();
                            set.segments
                                .iter()
                                .find(|m| m.has_unread())
                                .map(|m| m.file_index)
                        }
                    };
                    match file_index {
                        Some(file_index) => {
                            segment::discard_segment(&self.shared, file_index);
                            continue;
                        }
                        None => return,
                    }
                }
            }

            if self.standby.is_none() {
                // A write is in flight; once it completes its block is the
                // oldest unread data on disk.
                self.reclaim_completion(true);
                continue;
            }

            if self.active.has_unread() {
                std::mem::swap(&mut self.active, &mut self.head);
            }
            return;
        }
    }

    /// Recycle the in-flight write buffer back into `standby`
    fn reclaim_completion(&mut self, block: bool) {
        if self.standby.is_some() {
            return;
        }
        let done = if block {
            self.completions.recv().ok()
        } else {
            self.completions.try_recv().ok()
        };
        match done {
            Some(done) => {
                self.standby = Some(FrameBuffer::from_recycled(done.buffer, self.buffer_capacity));
            }
            None if block => {
                // Writer thread gone; keep the store operable in memory.
                self.standby = Some(FrameBuffer::new(self.buffer_capacity));
            }
            None => {}
        }
    }
}

impl Drop for OverflowStore {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "overflow store close on drop failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
