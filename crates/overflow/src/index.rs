//! Memory-mapped cursor index
//!
//! A fixed-size file mapping that persists, per segment slot, the byte
//! offsets a restart needs to resume from: how far the segment has been
//! read and how far it has been written. Entries are keyed by
//! `file_index % SLOT_COUNT`; each entry stamps the file index it
//! belongs to, so a stale entry for a rotated-away file is recognized and
//! ignored at recovery instead of corrupting cursors.
//!
//! # Layout
//!
//! ```text
//! [4-byte magic "FRYI"][4-byte version]
//! [entry 0: file_index u64 | read_cursor u64 | write_cursor u64]
//! [entry 1: file_index u64 | read_cursor u64 | write_cursor u64]
//! ```
//!
//! All fields little-endian; 64 bytes total (8 bytes of padding).

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::MmapMut;

use crate::error::Result;

const MAGIC: u32 = 0x4652_5949; // "FRYI"
const VERSION: u32 = 1;

/// Number of index entries
pub const SLOT_COUNT: u64 = 2;

const HEADER_LEN: usize = 8;
const ENTRY_LEN: usize = 24;
const INDEX_LEN: usize = 64;

/// The sentinel stored in an unclaimed or cleared entry
const EMPTY: u64 = u64::MAX;

/// Persisted read/write cursors for the live segment files
pub struct CursorIndex {
    map: MmapMut,
}

impl CursorIndex {
    /// Open (or create and initialize) the index file
    ///
    /// A file with a wrong magic or version is reinitialized empty - the
    /// cursors it held are only an optimization, never the data itself.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(INDEX_LEN as u64)?;

        // Safety: the map is private to this process; the store guarantees
        // a single writer at a time via its internal locking.
        let map = unsafe { MmapMut::map_mut(&file)? };
        let mut index = Self { map };

        if index.read_u32(0) != MAGIC || index.read_u32(4) != VERSION {
            tracing::debug!(path = %path.display(), "initializing cursor index");
            index.reinit();
        }

        Ok(index)
    }

    fn reinit(&mut self) {
        self.map[..].fill(0);
        self.write_u32(0, MAGIC);
        self.write_u32(4, VERSION);
        for slot in 0..SLOT_COUNT {
            self.write_u64(Self::entry_offset(slot), EMPTY);
        }
    }

    #[inline]
    fn entry_offset(slot: u64) -> usize {
        HEADER_LEN + (slot as usize) * ENTRY_LEN
    }

    #[inline]
    fn slot_for(file_index: u64) -> u64 {
        file_index % SLOT_COUNT
    }

    /// Persisted `(read_cursor, write_cursor)` for a file, if its entry
    /// has not been reused by another file on the same slot
    pub fn get(&self, file_index: u64) -> Option<(u64, u64)> {
        let off = Self::entry_offset(Self::slot_for(file_index));
        if self.read_u64(off) != file_index {
            return None;
        }
        Some((self.read_u64(off + 8), self.read_u64(off + 16)))
    }

    /// Record the write cursor for a file, claiming its slot
    ///
    /// Claiming a slot held by a different file resets that entry's read
    /// cursor to zero (the displaced file will be re-read from the start
    /// after a restart - a bounded duplicate, never a loss).
    pub fn set_write(&mut self, file_index: u64, write_cursor: u64) {
        let off = Self::entry_offset(Self::slot_for(file_index));
        if self.read_u64(off) != file_index {
            self.write_u64(off + 8, 0);
            self.write_u64(off, file_index);
        }
        self.write_u64(off + 16, write_cursor);
    }

    /// Record the read cursor for a file if it still owns its slot
    pub fn set_read(&mut self, file_index: u64, read_cursor: u64) {
        let off = Self::entry_offset(Self::slot_for(file_index));
        if self.read_u64(off) == file_index {
            self.write_u64(off + 8, read_cursor);
        }
    }

    /// Release a file's entry (after the segment is deleted)
    pub fn clear(&mut self, file_index: u64) {
        let off = Self::entry_offset(Self::slot_for(file_index));
        if self.read_u64(off) == file_index {
            self.write_u64(off, EMPTY);
            self.write_u64(off + 8, 0);
            self.write_u64(off + 16, 0);
        }
    }

    /// Flush the mapping to disk
    pub fn flush(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.map[offset..offset + 4].try_into().expect("index bounds"))
    }

    fn read_u64(&self, offset: usize) -> u64 {
        u64::from_le_bytes(self.map[offset..offset + 8].try_into().expect("index bounds"))
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.map[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn write_u64(&mut self, offset: usize, value: u64) {
        self.map[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }
}

impl std::fmt::Debug for CursorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("CursorIndex");
        for slot in 0..SLOT_COUNT {
            let off = Self::entry_offset(slot);
            s.field(
                &format!("slot{}", slot),
                &(
                    self.read_u64(off),
                    self.read_u64(off + 8),
                    self.read_u64(off + 16),
                ),
            );
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fresh_index_is_empty() {
        let dir = TempDir::new().unwrap();
        let index = CursorIndex::open(&dir.path().join("overflow.idx")).unwrap();

        assert_eq!(index.get(0), None);
        assert_eq!(index.get(1), None);
    }

    #[test]
    fn test_cursors_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("overflow.idx");

        {
            let mut index = CursorIndex::open(&path).unwrap();
            index.set_write(4, 8192);
            index.set_read(4, 1024);
            index.flush().unwrap();
        }

        let index = CursorIndex::open(&path).unwrap();
        assert_eq!(index.get(4), Some((1024, 8192)));
    }

    #[test]
    fn test_slot_reuse_resets_read_cursor() {
        let dir = TempDir::new().unwrap();
        let mut index = CursorIndex::open(&dir.path().join("overflow.idx")).unwrap();

        index.set_write(0, 500);
        index.set_read(0, 100);

        // File 2 lands on the same slot; file 0's entry is displaced.
        index.set_write(2, 64);
        assert_eq!(index.get(0), None);
        assert_eq!(index.get(2), Some((0, 64)));
    }

    #[test]
    fn test_set_read_ignores_foreign_slot() {
        let dir = TempDir::new().unwrap();
        let mut index = CursorIndex::open(&dir.path().join("overflow.idx")).unwrap();

        index.set_write(1, 300);
        index.set_read(3, 50);
        assert_eq!(index.get(1), Some((0, 300)));
        assert_eq!(index.get(3), None);
    }

    #[test]
    fn test_clear_releases_entry() {
        let dir = TempDir::new().unwrap();
        let mut index = CursorIndex::open(&dir.path().join("overflow.idx")).unwrap();

        index.set_write(5, 900);
        index.clear(5);
        assert_eq!(index.get(5), None);
    }

    #[test]
    fn test_garbage_file_is_reinitialized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("overflow.idx");
        std::fs::write(&path, vec![0xAB; 64]).unwrap();

        let index = CursorIndex::open(&path).unwrap();
        assert_eq!(index.get(0), None);
        assert_eq!(index.get(1), None);
    }
}
