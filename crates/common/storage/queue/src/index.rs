// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Dense offset index mapping logical record numbers to log byte positions.
//!
//! ## Index File Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Entries (16B each)                       │
//! ├─────────────────┬────────────────────────────────────────────┤
//! │ logical (8B)    │ physical (8B)                               │
//! ├─────────────────┼────────────────────────────────────────────┤
//! │ logical (8B)    │ physical (8B)                               │
//! └─────────────────┴────────────────────────────────────────────┘
//! ```
//!
//! Both fields are big-endian `u64`. There is no header, so the file length
//! is always a multiple of [`INDEX_ENTRY_SIZE`] once opened.
//!
//! ## Crash Safety
//!
//! An append interrupted by a crash leaves at most one partial trailing
//! entry. [`OffsetIndex::open`] truncates it away instead of failing. Any
//! other inconsistency, such as logical offsets that do not strictly
//! increase, is reported as [`QueueError::CorruptIndex`](crate::QueueError)
//! because floor lookups rely on the entries being sorted.
//!
//! ## Lookup
//!
//! All entries are held in memory. [`OffsetIndex::lookup_floor`] binary
//! searches them for the greatest logical offset not above the target.

use std::{
    fs::{File, OpenOptions},
    io::{BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use snafu::ensure;
use tracing::{debug, warn};

use crate::{
    Result,
    error::{CorruptIndexSnafu, NonMonotonicOffsetSnafu},
};

/// Size of each index entry in bytes (logical: 8 + physical: 8).
pub const INDEX_ENTRY_SIZE: u64 = 16;

/// A single index entry mapping a logical offset to a log byte position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Logical record number.
    pub logical:  u64,
    /// Byte offset of the record's length header in the log file.
    pub physical: u64,
}

impl IndexEntry {
    fn encode(self, buf: &mut [u8; INDEX_ENTRY_SIZE as usize]) {
        buf[0..8].copy_from_slice(&self.logical.to_be_bytes());
        buf[8..16].copy_from_slice(&self.physical.to_be_bytes());
    }

    fn decode(buf: &[u8; INDEX_ENTRY_SIZE as usize]) -> Self {
        let mut logical = [0u8; 8];
        let mut physical = [0u8; 8];
        logical.copy_from_slice(&buf[0..8]);
        physical.copy_from_slice(&buf[8..16]);
        Self {
            logical:  u64::from_be_bytes(logical),
            physical: u64::from_be_bytes(physical),
        }
    }
}

/// Append-only, crash-safe logical→physical offset index.
///
/// Not internally synchronized. The owning [`Queue`](crate::Queue) only
/// touches it while holding its state lock.
pub struct OffsetIndex {
    file:     File,
    path:     PathBuf,
    /// Current length of the index file in bytes.
    file_len: u64,
    /// All entries, sorted by logical offset.
    entries:  Vec<IndexEntry>,
    /// Reusable serialization buffer for appends.
    scratch:  [u8; INDEX_ENTRY_SIZE as usize],
}

impl OffsetIndex {
    /// Open or create the index at `path` and replay its entries.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::CorruptIndex`](crate::QueueError) if the stored
    /// logical offsets are not strictly increasing, or an I/O error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let size = file.metadata()?.len();
        let remainder = size % INDEX_ENTRY_SIZE;
        let file_len = size - remainder;
        if remainder != 0 {
            warn!(
                path = ?path,
                size,
                discarded = remainder,
                "Truncating partial trailing index entry"
            );
            file.set_len(file_len)?;
        }

        let entries = Self::replay(&mut file, file_len)?;

        debug!(path = ?path, entries = entries.len(), "Offset index loaded");

        Ok(Self {
            file,
            path,
            file_len,
            entries,
            scratch: [0u8; INDEX_ENTRY_SIZE as usize],
        })
    }

    fn replay(file: &mut File, file_len: u64) -> Result<Vec<IndexEntry>> {
        let count = file_len / INDEX_ENTRY_SIZE;
        let mut entries: Vec<IndexEntry> = Vec::with_capacity(count as usize);

        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(file);
        let mut buf = [0u8; INDEX_ENTRY_SIZE as usize];

        for position in 0..count {
            reader.read_exact(&mut buf)?;
            let entry = IndexEntry::decode(&buf);

            if let Some(previous) = entries.last() {
                ensure!(
                    entry.logical > previous.logical,
                    CorruptIndexSnafu {
                        position,
                        previous: previous.logical,
                        found: entry.logical,
                    }
                );
            }
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Record that `logical` starts at byte `physical` of the log.
    ///
    /// The entry reaches the file before the in-memory list; a failed write
    /// leaves the list unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NonMonotonicOffset`](crate::QueueError) without
    /// writing anything when `logical` does not exceed the last entry.
    pub fn append(&mut self, logical: u64, physical: u64) -> Result<()> {
        if let Some(last) = self.last_indexed_logical_offset() {
            ensure!(
                logical > last,
                NonMonotonicOffsetSnafu {
                    last,
                    attempted: logical,
                }
            );
        }

        let entry = IndexEntry { logical, physical };
        entry.encode(&mut self.scratch);

        if let Err(e) = self.write_scratch() {
            // Do not leave a torn entry behind for the next append to land after.
            if let Err(truncate_err) = self.file.set_len(self.file_len) {
                warn!(
                    path = ?self.path,
                    error = ?truncate_err,
                    "Failed to roll back index after write error"
                );
            }
            return Err(e);
        }

        self.file_len += INDEX_ENTRY_SIZE;
        self.entries.push(entry);
        Ok(())
    }

    fn write_scratch(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.file_len))?;
        self.file.write_all(&self.scratch)?;
        Ok(())
    }

    /// Physical offset of the greatest entry whose logical offset is `<=
    /// target`, or `None` if `target` precedes every entry.
    #[must_use]
    pub fn lookup_floor(&self, target: u64) -> Option<u64> {
        self.floor_entry(target).map(|e| e.physical)
    }

    /// Like [`lookup_floor`](Self::lookup_floor) but returns the whole entry.
    #[must_use]
    pub fn floor_entry(&self, target: u64) -> Option<IndexEntry> {
        // First entry with logical > target; the one before it is the floor.
        let idx = self.entries.partition_point(|e| e.logical <= target);
        idx.checked_sub(1).map(|i| self.entries[i])
    }

    /// The most recently appended logical offset, `None` when empty.
    #[must_use]
    pub fn last_indexed_logical_offset(&self) -> Option<u64> {
        self.entries.last().map(|e| e.logical)
    }

    #[must_use]
    pub fn last_entry(&self) -> Option<IndexEntry> { self.entries.last().copied() }

    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] { &self.entries }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    #[must_use]
    pub fn path(&self) -> &Path { &self.path }

    /// Force written entries to stable storage.
    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Flush and release the index file.
    pub fn close(mut self) -> Result<()> { self.flush() }
}
