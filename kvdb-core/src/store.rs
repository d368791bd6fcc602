//! Persistent string-to-string map backed by a memory-mapped file.
//!
//! The segment is an append-only log of records preceded by a small fixed
//! header. On open (and after every grow) the log is replayed into an
//! in-memory `HashMap<String, usize>` index mapping keys to the offset of
//! their most recent record, so lookups never scan the log. Insert/Update/
//! Delete append a new record; Get and the index never touch the file for
//! anything but the current record's bytes.
//!
//! Growth is by doubling: when a write doesn't fit in the remaining space,
//! the segment's backing file is resized to twice its current length and
//! the mmap is remapped, mirroring the original implementation's
//! `PersistableMap::Grow`.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::time::Duration;

use memmap2::{MmapMut, MmapOptions};
use parking_lot::RwLock;
use thiserror::Error;

/// Magic identifying a segment header written by this implementation.
const SEGMENT_MAGIC: u64 = 0x6B_76_64_62_5F_6D_61_70; // "kvdb_map" in ASCII hex
const SEGMENT_HEADER_LEN: usize = 16;
const TOMBSTONE_LIVE: u8 = 0;
const TOMBSTONE_DELETED: u8 = 1;

/// Default lock-acquisition timeout, matching the original's `scLockToutMs`.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum MapError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("lock could not be acquired within the configured timeout")]
    LockTimeout,
    #[error("key not found")]
    NotFound,
    #[error("key already exists")]
    AlreadyExists,
    #[error("segment corrupted: {0}")]
    Corrupt(&'static str),
}

/// Point-in-time counters describing the segment's occupancy, the Rust
/// analogue of the original's `PersistableMap::GetStat()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stat {
    pub live_entries: u64,
    pub tombstones: u64,
    pub segment_len: u64,
    pub write_offset: u64,
}

struct Segment {
    mmap: MmapMut,
    file: std::fs::File,
    write_offset: usize,
    index: HashMap<String, usize>,
    tombstones: u64,
}

impl Segment {
    fn open(path: &Path, initial_len: u64) -> Result<Self, MapError> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let metadata_len = file.metadata()?.len();
        if metadata_len < SEGMENT_HEADER_LEN as u64 {
            file.set_len(initial_len.max(SEGMENT_HEADER_LEN as u64))?;
        }
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        let magic = u64::from_le_bytes(mmap[0..8].try_into().unwrap());
        let write_offset = if magic == SEGMENT_MAGIC {
            u64::from_le_bytes(mmap[8..16].try_into().unwrap()) as usize
        } else {
            mmap[0..8].copy_from_slice(&SEGMENT_MAGIC.to_le_bytes());
            mmap[8..16].copy_from_slice(&(SEGMENT_HEADER_LEN as u64).to_le_bytes());
            SEGMENT_HEADER_LEN
        };

        let (index, tombstones) = replay(&mmap, write_offset)?;

        Ok(Segment { mmap, file, write_offset, index, tombstones })
    }

    fn persist_write_offset(&mut self) {
        self.mmap[8..16].copy_from_slice(&(self.write_offset as u64).to_le_bytes());
    }

    fn remaining(&self) -> usize {
        self.mmap.len() - self.write_offset
    }

    fn grow(&mut self, path: &Path) -> Result<(), MapError> {
        self.mmap.flush()?;
        let old_len = self.file.metadata()?.len();
        let new_len = old_len * 2;
        if let Err(e) = self.file.set_len(new_len) {
            // Original implementation falls back to the previous size on a
            // failed resize rather than leaving the segment half-grown.
            self.file.set_len(old_len)?;
            return Err(e.into());
        }
        let reopened = OpenOptions::new().read(true).write(true).open(path)?;
        self.mmap = unsafe { MmapOptions::new().map_mut(&reopened)? };
        self.file = reopened;
        Ok(())
    }

    fn append_record(&mut self, path: &Path, tombstone: u8, key: &str, value: &str) -> Result<(), MapError> {
        let needed = 1 + 4 + key.len() + 4 + value.len();
        if needed > self.remaining() {
            self.grow(path)?;
            if needed > self.remaining() {
                return Err(MapError::Corrupt("record does not fit even after growing segment"));
            }
        }

        let offset = self.write_offset;
        let mut pos = offset;
        self.mmap[pos] = tombstone;
        pos += 1;
        self.mmap[pos..pos + 4].copy_from_slice(&(key.len() as u32).to_le_bytes());
        pos += 4;
        self.mmap[pos..pos + key.len()].copy_from_slice(key.as_bytes());
        pos += key.len();
        self.mmap[pos..pos + 4].copy_from_slice(&(value.len() as u32).to_le_bytes());
        pos += 4;
        self.mmap[pos..pos + value.len()].copy_from_slice(value.as_bytes());
        pos += value.len();

        self.write_offset = pos;
        self.persist_write_offset();

        if tombstone == TOMBSTONE_DELETED {
            self.tombstones += 1;
            self.index.remove(key);
        } else {
            if self.index.insert(key.to_string(), offset).is_some() {
                self.tombstones += 1;
            }
        }
        Ok(())
    }

    fn read_value_at(&self, offset: usize) -> String {
        let mut pos = offset + 1;
        let key_len = u32::from_le_bytes(self.mmap[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4 + key_len;
        let value_len = u32::from_le_bytes(self.mmap[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        String::from_utf8_lossy(&self.mmap[pos..pos + value_len]).into_owned()
    }
}

fn replay(mmap: &MmapMut, write_offset: usize) -> Result<(HashMap<String, usize>, u64), MapError> {
    let mut index = HashMap::new();
    let mut tombstones = 0u64;
    let mut pos = SEGMENT_HEADER_LEN;
    while pos < write_offset {
        if pos + 5 > write_offset {
            return Err(MapError::Corrupt("truncated record header"));
        }
        let tombstone = mmap[pos];
        let key_len = u32::from_le_bytes(mmap[pos + 1..pos + 5].try_into().unwrap()) as usize;
        let key_start = pos + 5;
        if key_start + key_len + 4 > write_offset {
            return Err(MapError::Corrupt("truncated key"));
        }
        let key = String::from_utf8_lossy(&mmap[key_start..key_start + key_len]).into_owned();
        let value_len_pos = key_start + key_len;
        let value_len = u32::from_le_bytes(mmap[value_len_pos..value_len_pos + 4].try_into().unwrap()) as usize;
        let value_start = value_len_pos + 4;
        if value_start + value_len > write_offset {
            return Err(MapError::Corrupt("truncated value"));
        }

        if tombstone == TOMBSTONE_DELETED {
            if index.remove(&key).is_some() {
                tombstones += 1;
            }
        } else {
            if index.insert(key, pos).is_some() {
                tombstones += 1;
            }
        }
        pos = value_start + value_len;
    }
    Ok((index, tombstones))
}

/// A persistent, concurrently-accessible key-value map.
///
/// All operations take `lock_timeout` for their internal `RwLock`
/// acquisition and return [`MapError::LockTimeout`] if the timeout elapses
/// first, mirroring the original's `scLockToutMs`-bounded mutex waits.
pub struct PersistentMap {
    segment: RwLock<Segment>,
    path: std::path::PathBuf,
    lock_timeout: Duration,
}

impl PersistentMap {
    /// Opens (creating if absent) the map backed by the file at `path`,
    /// allocating at least `initial_len` bytes on first creation.
    pub fn open(path: impl AsRef<Path>, initial_len: u64) -> Result<Self, MapError> {
        let path = path.as_ref().to_path_buf();
        let segment = Segment::open(&path, initial_len)?;
        Ok(PersistentMap { segment: RwLock::new(segment), path, lock_timeout: DEFAULT_LOCK_TIMEOUT })
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn insert(&self, key: &str, value: &str) -> Result<(), MapError> {
        let mut seg = self.segment.try_write_for(self.lock_timeout).ok_or(MapError::LockTimeout)?;
        if seg.index.contains_key(key) {
            return Err(MapError::AlreadyExists);
        }
        seg.append_record(&self.path, TOMBSTONE_LIVE, key, value)
    }

    pub fn update(&self, key: &str, value: &str) -> Result<(), MapError> {
        let mut seg = self.segment.try_write_for(self.lock_timeout).ok_or(MapError::LockTimeout)?;
        if !seg.index.contains_key(key) {
            return Err(MapError::NotFound);
        }
        seg.append_record(&self.path, TOMBSTONE_LIVE, key, value)
    }

    pub fn get(&self, key: &str) -> Result<String, MapError> {
        let seg = self.segment.try_read_for(self.lock_timeout).ok_or(MapError::LockTimeout)?;
        let offset = *seg.index.get(key).ok_or(MapError::NotFound)?;
        Ok(seg.read_value_at(offset))
    }

    pub fn delete(&self, key: &str) -> Result<(), MapError> {
        let mut seg = self.segment.try_write_for(self.lock_timeout).ok_or(MapError::LockTimeout)?;
        if !seg.index.contains_key(key) {
            return Err(MapError::NotFound);
        }
        seg.append_record(&self.path, TOMBSTONE_DELETED, key, "")
    }

    /// Flushes the mmap to disk, the Rust analogue of `PersistableMap::Flush`.
    pub fn flush(&self) -> Result<(), MapError> {
        let seg = self.segment.try_read_for(self.lock_timeout).ok_or(MapError::LockTimeout)?;
        seg.mmap.flush()?;
        Ok(())
    }

    pub fn stat(&self) -> Result<Stat, MapError> {
        let seg = self.segment.try_read_for(self.lock_timeout).ok_or(MapError::LockTimeout)?;
        Ok(Stat {
            live_entries: seg.index.len() as u64,
            tombstones: seg.tombstones,
            segment_len: seg.mmap.len() as u64,
            write_offset: seg.write_offset as u64,
        })
    }
}
