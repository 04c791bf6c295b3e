//! Disk-backed FIFO overflow store
//!
//! When the transport backend is unavailable, the ingest stage redirects
//! records here. Records coalesce in an in-memory double buffer; full
//! buffers are handed to a dedicated disk-writer thread that appends them
//! as LZ4-compressed blocks to rotating segment files. A small
//! memory-mapped index persists the read/write cursors so a restart
//! resumes at exact byte offsets without scanning segment contents.
//!
//! # FIFO across the memory/disk boundary
//!
//! The read path drains, in order: the in-memory head buffer, then the
//! oldest on-disk block, then any write still in flight, and only when
//! nothing is on disk the still-open write buffer. Enqueue order is
//! therefore preserved end to end.
//!
//! # Threading
//!
//! All public methods run on one caller thread (the pipeline's ingest
//! consumer). The only internal concurrency is the disk-writer thread,
//! which communicates through a bounded job channel - at most one
//! asynchronous write is in flight per double-buffer pair.

mod error;
mod frame;
mod index;
mod metrics;
mod segment;
mod store;

pub use error::{OverflowError, Result};
pub use frame::{FrameBuffer, FRAME_HEADER};
pub use index::CursorIndex;
pub use metrics::{OverflowMetrics, OverflowMetricsSnapshot};
pub use store::{OverflowConfig, OverflowStore};
