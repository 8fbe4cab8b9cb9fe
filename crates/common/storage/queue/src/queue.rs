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

//! Main queue struct and lifecycle management.
//!
//! The [`Queue`] owns one log file and its [`OffsetIndex`]. It manages:
//! - Framed appends with logical offset assignment
//! - A sequential read cursor for ordered consumption
//! - Random access by logical offset through the index
//! - Batched `fdatasync` when durability is enabled
//!
//! ## Usage
//!
//! ```ignore
//! let queue = QueueBuilder::new("/path/to/queue.log").batch_limit(64).build()?;
//!
//! let offset = queue.enqueue(b"hello")?;
//! while let Some(payload) = queue.dequeue()? {
//!     println!("{payload:?}");
//! }
//!
//! queue.close()?;
//! ```
//!
//! ## Concurrency
//!
//! All operations take one handle-wide lock, so a `Queue` can be shared
//! between threads behind an `Arc`. At most one call touches the files at a
//! time. There are no background threads; syncing is driven by the append
//! counter alone.
//!
//! ## Read-side tail policy
//!
//! A frame is readable once the file holds all of its bytes. Anything shorter
//! reads as "no record" and leaves the cursor on the frame header, so the
//! next call retries. Within one handle a writer that crashed mid-frame is
//! indistinguishable from one that has not finished yet. Reopening settles
//! it: the torn frame is truncated away before the first new append.

use std::{
    fs::{File, OpenOptions},
    io::Write,
};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use snafu::{ResultExt, ensure};
use tracing::{debug, info, warn};

use crate::{
    QueueConfig, Result,
    error::{IndexAheadOfLogSnafu, InvalidUtf8Snafu, MessageTooLargeSnafu},
    frame::{FrameRead, encode_frame, read_frame},
    index::OffsetIndex,
    recovery::{TailState, inspect_tail},
};

/// A persistent, single-writer append-only queue.
pub struct Queue {
    config:     QueueConfig,
    tail_state: TailState,
    state:      Mutex<QueueState>,
}

/// Mutable handle state, only reached through the lock.
struct QueueState {
    /// Append-mode handle; all frames go through it.
    writer:         File,
    /// Independent handle for sequential and random reads.
    reader:         File,
    index:          OffsetIndex,
    /// Byte position where the next frame header will be written.
    write_position: u64,
    /// Byte position of the next frame `dequeue` will return.
    read_position:  u64,
    /// Logical offset the next enqueue will be assigned.
    next_offset:    u64,
    /// Appends since the last forced sync.
    batch_counter:  u32,
    /// Reused frame encoding buffer.
    scratch:        BytesMut,
    closed:         bool,
}

impl Queue {
    /// Open the queue described by `config`, creating its files if needed.
    ///
    /// Replays the index and resumes logical offsets after the last indexed
    /// record. The sequential read cursor always starts at the beginning of
    /// the log.
    ///
    /// A frame left half-written past the last indexed record is cut off so
    /// new records never land behind it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the files cannot be
    /// opened, the index is corrupt, or the index refers to a record the log
    /// does not fully hold
    /// ([`QueueError::IndexAheadOfLog`](crate::QueueError)).
    pub fn open(config: QueueConfig) -> Result<Self> {
        config.validate()?;

        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;
        let reader = File::open(&config.path)?;
        let index = OffsetIndex::open(config.index_path())?;

        let next_offset = index.last_indexed_logical_offset().map_or(0, |last| last + 1);
        let tail_state = inspect_tail(&config.path, index.last_entry(), config.max_message_size)?;
        match tail_state {
            TailState::IndexAhead { physical, log_len } => {
                return IndexAheadOfLogSnafu { physical, log_len }.fail();
            }
            TailState::TornFrame { position, .. } => {
                let log_len = writer.metadata()?.len();
                writer.set_len(position)?;
                writer.sync_data()?;
                warn!(
                    path = ?config.path,
                    position,
                    discarded = log_len - position,
                    "Truncated torn frame at end of log"
                );
            }
            TailState::Clean | TailState::UnindexedFrames { .. } => {}
        }
        let write_position = writer.metadata()?.len();

        info!(
            path = ?config.path,
            index_path = ?index.path(),
            durable = config.durable,
            next_offset,
            write_position,
            indexed = index.len(),
            "Queue opened"
        );

        Ok(Self {
            tail_state,
            state: Mutex::new(QueueState {
                writer,
                reader,
                index,
                write_position,
                read_position: 0,
                next_offset,
                batch_counter: 0,
                scratch: BytesMut::new(),
                closed: false,
            }),
            config,
        })
    }

    /// Append `payload` as one record and return its logical offset.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::MessageTooLarge`](crate::QueueError) without
    /// touching any file when the payload exceeds `max_message_size`, or an
    /// I/O error from the log or index write.
    pub fn enqueue(&self, payload: impl AsRef<[u8]>) -> Result<u64> {
        let payload = payload.as_ref();
        ensure!(
            payload.len() <= self.config.max_message_size as usize,
            MessageTooLargeSnafu {
                size: payload.len(),
                max:  self.config.max_message_size,
            }
        );

        self.state.lock().append(payload, &self.config)
    }

    /// UTF-8 convenience over [`enqueue`](Self::enqueue).
    pub fn enqueue_str(&self, message: &str) -> Result<u64> { self.enqueue(message.as_bytes()) }

    /// Return the next record in log order, or `None` when the reader has
    /// caught up with the writer.
    ///
    /// # Errors
    ///
    /// A length header above `max_message_size` is reported as
    /// [`QueueError::CorruptLength`](crate::QueueError) and the cursor stays
    /// on it; the log is not skipped past.
    pub fn dequeue(&self) -> Result<Option<Bytes>> {
        let mut state = self.state.lock();
        let Some((payload, next_position)) = state.peek(self.config.max_message_size)? else {
            return Ok(None);
        };
        state.read_position = next_position;
        Ok(Some(payload))
    }

    /// UTF-8 convenience over [`dequeue`](Self::dequeue).
    ///
    /// A record that is not valid UTF-8 yields
    /// [`QueueError::InvalidUtf8`](crate::QueueError) and is not consumed.
    pub fn dequeue_string(&self) -> Result<Option<String>> {
        let mut state = self.state.lock();
        let position = state.read_position;
        let Some((payload, next_position)) = state.peek(self.config.max_message_size)? else {
            return Ok(None);
        };
        let text = std::str::from_utf8(&payload)
            .context(InvalidUtf8Snafu { position })?
            .to_owned();
        state.read_position = next_position;
        Ok(Some(text))
    }

    /// Read the record with logical offset `logical` through the index.
    ///
    /// Returns `None` if no record with that offset has been indexed. Does
    /// not move the sequential read cursor.
    pub fn read_at(&self, logical: u64) -> Result<Option<Bytes>> {
        let mut state = self.state.lock();
        let Some(entry) = state.index.floor_entry(logical) else {
            return Ok(None);
        };
        if entry.logical != logical {
            return Ok(None);
        }

        match read_frame(&mut state.reader, entry.physical, self.config.max_message_size)? {
            FrameRead::Complete { payload, .. } => Ok(Some(payload)),
            FrameRead::Empty | FrameRead::Partial { .. } => {
                warn!(
                    logical,
                    physical = entry.physical,
                    "Indexed record is not fully present in the log"
                );
                Ok(None)
            }
        }
    }

    /// Force unsynced appends to stable storage. No-op unless durable with
    /// pending appends.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        if self.config.durable {
            state.sync_pending()?;
        }
        Ok(())
    }

    /// Flush and release both file handles.
    ///
    /// This is the only path that closes the durability window for records
    /// already enqueued. Dropping the queue attempts the same flush but can
    /// only log a failure.
    pub fn close(self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        if self.config.durable {
            state.sync_pending()?;
        }

        info!(
            path = ?self.config.path,
            next_offset = state.next_offset,
            write_position = state.write_position,
            "Queue closed"
        );
        Ok(())
    }

    /// Logical offset the next enqueue will receive.
    #[must_use]
    pub fn next_logical_offset(&self) -> u64 { self.state.lock().next_offset }

    /// Logical offset of the most recent record, `None` for an empty queue.
    #[must_use]
    pub fn last_indexed_logical_offset(&self) -> Option<u64> {
        self.state.lock().index.last_indexed_logical_offset()
    }

    /// Byte position of the next record `dequeue` will return.
    #[must_use]
    pub fn read_position(&self) -> u64 { self.state.lock().read_position }

    /// Byte position where the next record will be written.
    #[must_use]
    pub fn write_position(&self) -> u64 { self.state.lock().write_position }

    /// Appends not yet forced to stable storage.
    #[must_use]
    pub fn pending_syncs(&self) -> u32 { self.state.lock().batch_counter }

    /// What the open-time inspection found past the last indexed record.
    #[must_use]
    pub const fn tail_state(&self) -> TailState { self.tail_state }

    #[must_use]
    pub const fn config(&self) -> &QueueConfig { &self.config }
}

impl QueueState {
    fn append(&mut self, payload: &[u8], config: &QueueConfig) -> Result<u64> {
        let physical = self.write_position;
        encode_frame(&mut self.scratch, payload);

        if let Err(e) = self.writer.write_all(&self.scratch) {
            // Part of the frame may have landed; trust the file, not our count.
            match self.writer.metadata() {
                Ok(meta) => self.write_position = meta.len(),
                Err(meta_err) => warn!(error = %meta_err, "Failed to resync write position"),
            }
            return Err(e.into());
        }
        self.write_position += self.scratch.len() as u64;

        let logical = self.next_offset;
        if let Err(e) = self.index.append(logical, physical) {
            warn!(
                logical,
                physical,
                error = %e,
                "Frame written to log but not indexed"
            );
            return Err(e);
        }
        self.next_offset += 1;

        if config.durable {
            self.batch_counter += 1;
            if self.batch_counter >= config.batch_limit {
                self.sync_pending()?;
            }
        }

        Ok(logical)
    }

    /// The frame at the read cursor and the position after it, without
    /// advancing.
    fn peek(&mut self, max_message_size: u32) -> Result<Option<(Bytes, u64)>> {
        match read_frame(&mut self.reader, self.read_position, max_message_size)? {
            FrameRead::Complete {
                payload,
                next_position,
            } => Ok(Some((payload, next_position))),
            FrameRead::Empty => Ok(None),
            FrameRead::Partial { length } => {
                debug!(
                    position = self.read_position,
                    length, "Frame not fully written yet"
                );
                Ok(None)
            }
        }
    }

    /// Sync the log, then the index, if any append is unsynced.
    fn sync_pending(&mut self) -> Result<()> {
        if self.batch_counter == 0 {
            return Ok(());
        }

        self.writer.sync_data()?;
        self.index.flush()?;
        debug!(
            records = self.batch_counter,
            write_position = self.write_position,
            "Synced queue to disk"
        );
        self.batch_counter = 0;
        Ok(())
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.closed || !self.config.durable {
            return;
        }
        if let Err(e) = state.sync_pending() {
            warn!(error = %e, path = ?self.config.path, "Failed to sync queue on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, path::Path};

    use tempfile::TempDir;

    use super::*;
    use crate::{QueueBuilder, QueueError, index::INDEX_ENTRY_SIZE};

    fn open(path: &Path) -> Queue {
        QueueBuilder::new(path)
            .max_message_size(64)
            .batch_limit(4)
            .build()
            .unwrap()
    }

    fn append_raw(path: &Path, bytes: &[u8]) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(bytes).unwrap();
    }

    #[test]
    fn test_empty_queue_dequeues_none() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open(&temp_dir.path().join("q.log"));

        assert!(queue.dequeue().unwrap().is_none());
        assert_eq!(queue.next_logical_offset(), 0);
        assert_eq!(queue.last_indexed_logical_offset(), None);
        assert_eq!(queue.tail_state(), TailState::Clean);
    }

    #[test]
    fn test_enqueue_assigns_offsets_and_positions() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("q.log");
        let queue = open(&path);

        assert_eq!(queue.enqueue(b"abc").unwrap(), 0);
        assert_eq!(queue.write_position(), 7);
        assert_eq!(queue.enqueue(b"").unwrap(), 1);
        assert_eq!(queue.enqueue_str("hello").unwrap(), 2);
        assert_eq!(queue.write_position(), 7 + 4 + 9);

        let index = OffsetIndex::open(path.with_extension("index")).unwrap();
        let physical: Vec<u64> = index.entries().iter().map(|e| e.physical).collect();
        assert_eq!(physical, vec![0, 7, 11]);
    }

    #[test]
    fn test_oversized_payload_is_rejected_without_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("q.log");
        let queue = open(&path);
        queue.enqueue(vec![1u8; 64]).unwrap();

        let err = queue.enqueue(vec![1u8; 65]).unwrap_err();
        assert!(matches!(err, QueueError::MessageTooLarge {
            size: 65,
            max: 64,
            ..
        }));

        assert_eq!(queue.write_position(), 68);
        assert_eq!(queue.next_logical_offset(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 68);
        assert_eq!(
            std::fs::metadata(path.with_extension("index")).unwrap().len(),
            INDEX_ENTRY_SIZE
        );
    }

    #[test]
    fn test_batch_counter_syncs_at_limit() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open(&temp_dir.path().join("q.log"));

        for i in 0..3u8 {
            queue.enqueue([i]).unwrap();
        }
        assert_eq!(queue.pending_syncs(), 3);

        queue.enqueue([3u8]).unwrap();
        assert_eq!(queue.pending_syncs(), 0);

        queue.enqueue([4u8]).unwrap();
        queue.flush().unwrap();
        assert_eq!(queue.pending_syncs(), 0);
    }

    #[test]
    fn test_non_durable_never_counts() {
        let temp_dir = TempDir::new().unwrap();
        let queue = QueueBuilder::new(temp_dir.path().join("q.log"))
            .durable(false)
            .batch_limit(1)
            .build()
            .unwrap();

        queue.enqueue(b"x").unwrap();
        assert_eq!(queue.pending_syncs(), 0);
        queue.flush().unwrap();
        queue.close().unwrap();
    }

    #[test]
    fn test_partial_tail_is_not_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("q.log");
        let queue = open(&path);

        queue.enqueue(b"whole").unwrap();

        // A writer that has put down a header and half its payload.
        append_raw(&path, &[0, 0, 0, 6, b'h', b'a', b'l']);

        assert_eq!(queue.dequeue().unwrap().unwrap(), Bytes::from_static(b"whole"));
        let cursor = queue.read_position();
        assert!(queue.dequeue().unwrap().is_none());
        assert_eq!(queue.read_position(), cursor);

        // The writer finishes; the record becomes visible.
        append_raw(&path, b"ves");
        assert_eq!(queue.dequeue().unwrap().unwrap(), Bytes::from_static(b"halves"));
    }

    #[test]
    fn test_partial_header_is_not_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("q.log");
        let queue = open(&path);

        append_raw(&path, &[0, 0]);
        assert!(queue.dequeue().unwrap().is_none());
        assert_eq!(queue.read_position(), 0);
    }

    #[test]
    fn test_corrupt_length_is_fatal_and_sticky() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("q.log");
        let queue = open(&path);

        queue.enqueue(b"ok").unwrap();
        append_raw(&path, &65u32.to_be_bytes());
        append_raw(&path, &[0u8; 65]);

        assert_eq!(queue.dequeue().unwrap().unwrap(), Bytes::from_static(b"ok"));
        for _ in 0..2 {
            let err = queue.dequeue().unwrap_err();
            assert!(matches!(err, QueueError::CorruptLength {
                position: 6,
                length: 65,
                ..
            }));
        }
        assert_eq!(queue.read_position(), 6);
    }

    #[test]
    fn test_dequeue_string_does_not_consume_invalid_utf8() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open(&temp_dir.path().join("q.log"));

        queue.enqueue([0xFFu8, 0xFE]).unwrap();
        queue.enqueue_str("after").unwrap();

        let err = queue.dequeue_string().unwrap_err();
        assert!(matches!(err, QueueError::InvalidUtf8 { position: 0, .. }));
        assert_eq!(queue.read_position(), 0);

        assert_eq!(&queue.dequeue().unwrap().unwrap()[..], &[0xFFu8, 0xFE][..]);
        assert_eq!(queue.dequeue_string().unwrap().as_deref(), Some("after"));
    }

    #[test]
    fn test_read_at_leaves_cursor_alone() {
        let temp_dir = TempDir::new().unwrap();
        let queue = open(&temp_dir.path().join("q.log"));

        for i in 0..5 {
            queue.enqueue(format!("record-{i}")).unwrap();
        }

        assert_eq!(queue.dequeue().unwrap().unwrap(), Bytes::from("record-0"));
        assert_eq!(queue.read_at(3).unwrap().unwrap(), Bytes::from("record-3"));
        assert_eq!(queue.read_at(0).unwrap().unwrap(), Bytes::from("record-0"));
        assert!(queue.read_at(5).unwrap().is_none());
        assert_eq!(queue.dequeue().unwrap().unwrap(), Bytes::from("record-1"));
    }

    #[test]
    fn test_reopen_truncates_torn_frame_before_appending() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("q.log");
        {
            let queue = open(&path);
            queue.enqueue(b"first").unwrap();
            queue.close().unwrap();
        }
        // Header for nine bytes, only one of them written.
        append_raw(&path, &[0, 0, 0, 9, b'x']);

        let queue = open(&path);
        assert_eq!(queue.tail_state(), TailState::TornFrame {
            position:  9,
            unindexed: 0,
        });
        assert_eq!(queue.write_position(), 9);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 9);

        assert_eq!(queue.enqueue(b"second-record").unwrap(), 1);
        assert_eq!(queue.dequeue().unwrap().unwrap(), Bytes::from_static(b"first"));
        assert_eq!(
            queue.dequeue().unwrap().unwrap(),
            Bytes::from_static(b"second-record")
        );
        assert!(queue.dequeue().unwrap().is_none());
        assert_eq!(
            queue.read_at(1).unwrap().unwrap(),
            Bytes::from_static(b"second-record")
        );
    }

    #[test]
    fn test_index_ahead_of_log_refuses_to_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("q.log");
        {
            let queue = QueueBuilder::new(&path).durable(false).build().unwrap();
            for payload in [b"aaaa", b"bbbb", b"cccc"] {
                queue.enqueue(payload).unwrap();
            }
            queue.close().unwrap();
        }
        // The log lost its last record, the index did not.
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(16)
            .unwrap();

        let err = QueueBuilder::new(&path).build().err().unwrap();
        assert!(matches!(err, QueueError::IndexAheadOfLog {
            physical: 16,
            log_len: 16,
            ..
        }));
        assert!(err.is_corruption());
        // Nothing was appended behind the damaged tail.
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);
    }

    #[test]
    fn test_failed_index_append_leaves_frame_unindexed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("q.log");
        let queue = open(&path);
        queue.enqueue(b"first").unwrap();

        // Claim the next logical offset behind the queue's back.
        queue.state.lock().index.append(1, 1_000).unwrap();

        let err = queue.enqueue(b"orphan").unwrap_err();
        assert!(matches!(err, QueueError::NonMonotonicOffset {
            last: 1,
            attempted: 1,
            ..
        }));
        // The frame reached the log, the offset was not handed out.
        assert_eq!(queue.write_position(), 9 + 10);
        assert_eq!(queue.next_logical_offset(), 1);

        assert_eq!(queue.dequeue().unwrap().unwrap(), Bytes::from_static(b"first"));
        assert_eq!(queue.dequeue().unwrap().unwrap(), Bytes::from_static(b"orphan"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let result = QueueBuilder::new(temp_dir.path().join("q.log"))
            .batch_limit(0)
            .build();
        assert!(matches!(result, Err(QueueError::InvalidConfig { .. })));
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a").join("b").join("q.log");
        let queue = open(&path);
        queue.enqueue(b"x").unwrap();
        queue.close().unwrap();

        assert!(path.exists());
        assert!(path.with_extension("index").exists());
    }
}
