//! Segment files and the dedicated disk-writer thread
//!
//! A segment file is an append-only sequence of blocks, each block one
//! coalesced double-buffer flush:
//!
//! ```text
//! [4-byte compressed length][4-byte record count][LZ4 data (size-prepended)]
//! ```
//!
//! Files are named `<prefix>-<index>.log` with a monotonically increasing
//! index. The last file is the open write target; earlier files are
//! sealed. Sealed-file count is bounded by `max_segments`: rotation past
//! the bound deletes the oldest sealed segment and counts its remaining
//! records as dropped.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::BytesMut;
use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{OverflowError, Result};
use crate::frame::FRAME_HEADER;
use crate::index::CursorIndex;
use crate::metrics::OverflowMetrics;

/// Size of the on-disk block header
pub(crate) const BLOCK_HEADER: u64 = 8;

/// Bookkeeping for one segment file
#[derive(Debug)]
pub(crate) struct SegmentMeta {
    pub file_index: u64,
    pub read_cursor: u64,
    pub write_cursor: u64,
    /// Frames on disk not yet loaded into the head buffer
    pub records: u64,
    /// Payload bytes corresponding to `records`
    pub payload_bytes: u64,
    pub sealed: bool,
}

impl SegmentMeta {
    pub fn has_unread(&self) -> bool {
        self.read_cursor < self.write_cursor
    }
}

/// The set of live segment files plus the cursor index
///
/// Shared between the caller thread (reads) and the disk-writer thread
/// (appends and rotation) under one mutex; every touch is a cold path.
pub(crate) struct SegmentSet {
    pub dir: PathBuf,
    pub prefix: String,
    /// Oldest first; the last entry (if any) is the open write target
    pub segments: VecDeque<SegmentMeta>,
    pub index: CursorIndex,
}

impl SegmentSet {
    pub fn segment_path(&self, file_index: u64) -> PathBuf {
        self.dir.join(format!("{}-{}.log", self.prefix, file_index))
    }

    /// Open the store folder, adopting cursors from the index
    ///
    /// Creates the folder on first use. Existing segment files are listed
    /// by name; a file whose index entry survived gets exact byte
    /// cursors, any other file is treated as unread from the start. Block
    /// headers (not contents) are walked once to rebuild record counts.
    pub fn recover(dir: &Path, prefix: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let index = CursorIndex::open(&dir.join(format!("{}.idx", prefix)))?;

        let mut found: Vec<(u64, u64)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(file_index) = parse_segment_name(&name.to_string_lossy(), prefix) else {
                continue;
            };
            found.push((file_index, entry.metadata()?.len()));
        }
        found.sort_unstable();

        let mut set = Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            segments: VecDeque::new(),
            index,
        };

        let last = found.last().map(|&(i, _)| i);
        for (file_index, file_len) in found {
            let (read_cursor, write_cursor) = match set.index.get(file_index) {
                Some((r, w)) => (r.min(file_len), w.min(file_len)),
                None => (0, file_len),
            };

            if read_cursor >= write_cursor {
                // Fully consumed before the restart; nothing to resume.
                let path = set.segment_path(file_index);
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove drained segment");
                }
                set.index.clear(file_index);
                continue;
            }

            let (records, payload_bytes) =
                walk_block_headers(&set.segment_path(file_index), read_cursor, write_cursor)?;

            set.segments.push_back(SegmentMeta {
                file_index,
                read_cursor,
                write_cursor,
                records,
                payload_bytes,
                sealed: Some(file_index) != last,
            });
        }

        if !set.segments.is_empty() {
            tracing::info!(
                dir = %dir.display(),
                segments = set.segments.len(),
                "recovered overflow segments"
            );
        }

        Ok(set)
    }
}

fn parse_segment_name(name: &str, prefix: &str) -> Option<u64> {
    name.strip_prefix(prefix)?
        .strip_prefix('-')?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

/// Sum record counts and payload bytes by hopping block headers
///
/// Reads 12 bytes per block (header plus the LZ4 size prefix), never the
/// block contents. A header pointing past the write cursor ends the walk.
fn walk_block_headers(path: &Path, from: u64, to: u64) -> Result<(u64, u64)> {
    let mut file = File::open(path)?;
    let mut offset = from;
    let mut records = 0u64;
    let mut payload = 0u64;

    while offset + BLOCK_HEADER <= to {
        file.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; 12];
        match file.read_exact(&mut header) {
            Ok(()) => {}
            // Torn tail from a crash mid-append; everything before it
            // is intact and counted.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let comp_len = u32::from_be_bytes(header[0..4].try_into().expect("header")) as u64;
        let count = u32::from_be_bytes(header[4..8].try_into().expect("header")) as u64;
        let uncompressed = u32::from_le_bytes(header[8..12].try_into().expect("header")) as u64;

        if offset + BLOCK_HEADER + comp_len > to {
            break;
        }

        records += count;
        payload += uncompressed.saturating_sub(count * FRAME_HEADER as u64);
        offset += BLOCK_HEADER + comp_len;
    }

    Ok((records, payload))
}

fn resume_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{}.head", prefix))
}

/// Park head-buffer frames at close so a restart hands them out first
///
/// Head frames predate every block still on disk, so appending them to a
/// segment would reorder the queue; they get their own file instead.
pub(crate) fn write_resume(dir: &Path, prefix: &str, frames: &[u8], records: u64) -> Result<()> {
    let path = resume_path(dir, prefix);
    let mut file = File::create(&path)?;
    file.write_all(&(records as u32).to_be_bytes())?;
    file.write_all(frames)?;
    file.sync_all()?;
    tracing::debug!(records, "head frames parked for restart");
    Ok(())
}

/// Read and delete the resume file left by the previous close, if any
///
/// The frame walk is validated against the stored record count; a
/// malformed file is discarded with a logged loss, never a failed open.
pub(crate) fn take_resume(dir: &Path, prefix: &str) -> Result<Option<(Vec<u8>, u64)>> {
    let path = resume_path(dir, prefix);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    fs::remove_file(&path)?;

    if bytes.len() < 4 {
        tracing::error!(path = %path.display(), "resume file too short, discarded");
        return Ok(None);
    }
    let records = u32::from_be_bytes(bytes[0..4].try_into().expect("header")) as u64;
    let frames = bytes[4..].to_vec();

    let mut offset = 0usize;
    let mut walked = 0u64;
    while offset + FRAME_HEADER <= frames.len() {
        let len =
            u32::from_be_bytes(frames[offset + 8..offset + 12].try_into().expect("frame")) as usize;
        offset += FRAME_HEADER + len;
        walked += 1;
    }
    if offset != frames.len() || walked != records {
        tracing::error!(records, walked, "resume file corrupt, discarded");
        return Ok(None);
    }
    Ok(Some((frames, records)))
}

/// State shared between the store and its disk-writer thread
pub(crate) struct Shared {
    pub set: Mutex<SegmentSet>,
    pub metrics: Arc<OverflowMetrics>,
}

/// A coalesced buffer handed to the disk writer
pub(crate) struct WriteJob {
    pub data: BytesMut,
    pub records: u64,
    pub payload_bytes: u64,
}

/// Completion of one asynchronous write, returning the backing storage
///
/// Write failures are accounted and logged by the writer itself; the
/// store only needs its buffer back.
pub(crate) struct WriteDone {
    pub buffer: BytesMut,
}

pub(crate) enum WriterMsg {
    Write(WriteJob),
    Close,
}

/// The dedicated disk-writer thread body
pub(crate) struct SegmentWriter {
    shared: std::sync::Arc<Shared>,
    jobs: Receiver<WriterMsg>,
    done: Sender<WriteDone>,
    segment_capacity: u64,
    max_segments: usize,

    /// Open write target (lazily created)
    current: Option<(u64, File)>,
}

impl SegmentWriter {
    pub fn new(
        shared: std::sync::Arc<Shared>,
        jobs: Receiver<WriterMsg>,
        done: Sender<WriteDone>,
        segment_capacity: u64,
        max_segments: usize,
    ) -> Self {
        Self {
            shared,
            jobs,
            done,
            segment_capacity,
            max_segments,
            current: None,
        }
    }

    /// Process write jobs until closed
    pub fn run(mut self) {
        while let Ok(msg) = self.jobs.recv() {
            match msg {
                WriterMsg::Write(job) => {
                    let records = job.records;
                    if let Err(e) = self.write_block(&job) {
                        tracing::error!(error = %e, records, "segment write failed");
                        self.shared.metrics.dropped_records.fetch_add(records, Ordering::Relaxed);
                        self.shared.metrics.queued_records.fetch_sub(records, Ordering::Relaxed);
                        self.shared
                            .metrics.queued_bytes
                            .fetch_sub(job.payload_bytes, Ordering::Relaxed);
                    }
                    let mut buffer = job.data;
                    buffer.clear();
                    // The store always awaits completions; a send can only
                    // fail after the store is gone, where the data is moot.
                    let _ = self.done.send(WriteDone { buffer });
                }
                WriterMsg::Close => break,
            }
        }

        if let Some((_, file)) = self.current.take() {
            if let Err(e) = file.sync_all() {
                tracing::warn!(error = %e, "final segment sync failed");
            }
        }
        let set = self.shared.set.lock();
        if let Err(e) = set.index.flush() {
            tracing::warn!(error = %e, "final index flush failed");
        }
        tracing::debug!("disk writer finished");
    }

    /// Compress and append one block, rotating and pruning as needed
    fn write_block(&mut self, job: &WriteJob) -> Result<()> {
        let compressed = lz4_flex::compress_prepend_size(&job.data);
        let block_len = BLOCK_HEADER + compressed.len() as u64;

        self.ensure_current()?;
        let needs_rotation = {
            let set = self.shared.set.lock();
            let meta = set.segments.back().expect("open segment");
            meta.write_cursor > 0 && meta.write_cursor + block_len > self.segment_capacity
        };
        if needs_rotation {
            self.rotate()?;
        }

        let (file_index, file) = self.current.as_mut().expect("open segment");
        let mut header = [0u8; 8];
        header[0..4].copy_from_slice(&(compressed.len() as u32).to_be_bytes());
        header[4..8].copy_from_slice(&(job.records as u32).to_be_bytes());
        file.write_all(&header)?;
        file.write_all(&compressed)?;
        file.flush()?;

        let mut set = self.shared.set.lock();
        let meta = set.segments.back_mut().expect("open segment");
        meta.write_cursor += block_len;
        meta.records += job.records;
        meta.payload_bytes += job.payload_bytes;
        let (fi, wc) = (*file_index, meta.write_cursor);
        set.index.set_write(fi, wc);

        self.shared.metrics.spilled_blocks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            segment = fi,
            records = job.records,
            bytes = compressed.len(),
            "block spilled to disk"
        );
        Ok(())
    }

    /// Open the write target, adopting a recovered open segment if present
    fn ensure_current(&mut self) -> Result<()> {
        if self.current.is_some() {
            return Ok(());
        }

        let mut set = self.shared.set.lock();
        if let Some(meta) = set.segments.back() {
            if !meta.sealed {
                let path = set.segment_path(meta.file_index);
                let file = OpenOptions::new().write(true).open(&path)?;
                // Drop any torn tail beyond the indexed write cursor.
                file.set_len(meta.write_cursor)?;
                let mut file = file;
                file.seek(SeekFrom::End(0))?;
                self.current = Some((meta.file_index, file));
                return Ok(());
            }
        }

        let file_index = set.segments.back().map(|m| m.file_index + 1).unwrap_or(0);
        let path = set.segment_path(file_index);
        let file = OpenOptions::new().create(true).write(true).open(&path)?;
        set.segments.push_back(SegmentMeta {
            file_index,
            read_cursor: 0,
            write_cursor: 0,
            records: 0,
            payload_bytes: 0,
            sealed: false,
        });
        set.index.set_write(file_index, 0);
        tracing::debug!(path = %path.display(), "opened segment");
        self.current = Some((file_index, file));
        Ok(())
    }

    /// Seal the open segment, prune past the bound, open the next file
    fn rotate(&mut self) -> Result<()> {
        let (old_index, old_file) = self.current.take().expect("open segment");
        if let Err(e) = old_file.sync_all() {
            tracing::warn!(segment = old_index, error = %e, "segment sync on seal failed");
        }

        let mut set = self.shared.set.lock();
        if let Some(meta) = set.segments.back_mut() {
            meta.sealed = true;
        }
        if let Err(e) = set.index.flush() {
            tracing::warn!(error = %e, "index flush on seal failed");
        }

        // Keep at most `max_segments` sealed files; the oldest goes first.
        while set.segments.iter().filter(|m| m.sealed).count() > self.max_segments {
            let meta = set.segments.pop_front().expect("sealed segment");
            let path = set.segment_path(meta.file_index);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to delete pruned segment");
            }
            set.index.clear(meta.file_index);

            self.shared.metrics.pruned_segments.fetch_add(1, Ordering::Relaxed);
            self.shared
                .metrics.dropped_records
                .fetch_add(meta.records, Ordering::Relaxed);
            self.shared
                .metrics.queued_records
                .fetch_sub(meta.records, Ordering::Relaxed);
            self.shared
                .metrics.queued_bytes
                .fetch_sub(meta.payload_bytes, Ordering::Relaxed);

            tracing::warn!(
                segment = meta.file_index,
                records_lost = meta.records,
                "segment bound exceeded, oldest sealed segment pruned"
            );
        }

        let file_index = old_index + 1;
        let path = set.segment_path(file_index);
        let file = OpenOptions::new().create(true).write(true).open(&path)?;
        set.segments.push_back(SegmentMeta {
            file_index,
            read_cursor: 0,
            write_cursor: 0,
            records: 0,
            payload_bytes: 0,
            sealed: false,
        });
        set.index.set_write(file_index, 0);

        tracing::debug!(segment = file_index, "rotated to new segment");
        self.current = Some((file_index, file));
        Ok(())
    }
}

/// Read the next unread block into memory (caller-thread side)
///
/// Returns the decompressed frame bytes and the record count, or `None`
/// when no unread block exists on disk. Advances the read cursor and
/// deletes a sealed segment once fully consumed.
pub(crate) fn read_next_block(shared: &Shared) -> Result<Option<(Vec<u8>, u64)>> {
    let mut set = shared.set.lock();

    let Some(pos) = set.segments.iter().position(|m| m.has_unread()) else {
        return Ok(None);
    };

    let meta = &set.segments[pos];
    let (file_index, offset) = (meta.file_index, meta.read_cursor);
    let path = set.segment_path(file_index);

    let corrupt = || OverflowError::CorruptBlock { file_index, offset };

    let mut file = File::open(&path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut header = [0u8; 8];
    file.read_exact(&mut header)?;
    let comp_len = u32::from_be_bytes(header[0..4].try_into().expect("header")) as u64;
    let records = u32::from_be_bytes(header[4..8].try_into().expect("header")) as u64;

    if offset + BLOCK_HEADER + comp_len > set.segments[pos].write_cursor || records == 0 {
        return Err(corrupt());
    }

    let mut compressed = vec![0u8; comp_len as usize];
    file.read_exact(&mut compressed)?;
    let frames = lz4_flex::decompress_size_prepended(&compressed).map_err(|_| corrupt())?;

    let meta = &mut set.segments[pos];
    meta.read_cursor += BLOCK_HEADER + comp_len;
    meta.records = meta.records.saturating_sub(records);
    let payload = (frames.len() as u64).saturating_sub(records * FRAME_HEADER as u64);
    meta.payload_bytes = meta.payload_bytes.saturating_sub(payload);
    let (fi, rc) = (meta.file_index, meta.read_cursor);
    set.index.set_read(fi, rc);

    if set.segments[pos].sealed && !set.segments[pos].has_unread() {
        let meta = set.segments.remove(pos).expect("segment present");
        let path = set.segment_path(meta.file_index);
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete drained segment");
        }
        set.index.clear(meta.file_index);
        tracing::debug!(segment = meta.file_index, "drained segment deleted");
    }

    Ok(Some((frames, records)))
}

/// Discard a segment after a read error (bounded loss, not a crash)
pub(crate) fn discard_segment(shared: &Shared, file_index: u64) {
    let mut set = shared.set.lock();
    let Some(pos) = set.segments.iter().position(|m| m.file_index == file_index) else {
        return;
    };

    let sealed = set.segments[pos].sealed;
    if sealed {
        let meta = set.segments.remove(pos).expect("segment present");
        let path = set.segment_path(meta.file_index);
        let _ = fs::remove_file(&path);
        set.index.clear(meta.file_index);
        account_discard(shared, &meta);
    } else {
        // The open segment cannot be deleted under the writer; skip its
        // unread region instead.
        let meta = &mut set.segments[pos];
        let records = meta.records;
        let payload = meta.payload_bytes;
        meta.read_cursor = meta.write_cursor;
        meta.records = 0;
        meta.payload_bytes = 0;
        let (fi, rc) = (meta.file_index, meta.read_cursor);
        set.index.set_read(fi, rc);
        account_discard(
            shared,
            &SegmentMeta {
                file_index: fi,
                read_cursor: rc,
                write_cursor: rc,
                records,
                payload_bytes: payload,
                sealed: false,
            },
        );
    }
}

fn account_discard(shared: &Shared, meta: &SegmentMeta) {
    shared
        .metrics.dropped_records
        .fetch_add(meta.records, Ordering::Relaxed);
    shared
        .metrics.queued_records
        .fetch_sub(meta.records, Ordering::Relaxed);
    shared
        .metrics.queued_bytes
        .fetch_sub(meta.payload_bytes, Ordering::Relaxed);
    tracing::error!(
        segment = meta.file_index,
        records_lost = meta.records,
        "corrupt segment discarded"
    );
}
