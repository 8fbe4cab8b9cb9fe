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

use std::io;

use snafu::Snafu;

/// Queue operation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// Filesystem I/O failure.
    #[snafu(display("IO error: {source}"), context(false))]
    Io {
        source: io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// Payload exceeds the configured per-record ceiling. Nothing was written.
    #[snafu(display("Message too large: {size} bytes exceeds limit of {max}"))]
    MessageTooLarge {
        size: usize,
        max:  u32,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    /// A frame header decoded to a length outside `[0, max]`.
    #[snafu(display("Corrupt length {length} at byte {position} (limit {max})"))]
    CorruptLength {
        position: u64,
        length:   u32,
        max:      u32,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },

    /// The payload ran out after the tail check said it was present.
    #[snafu(display("Unexpected EOF reading {length}-byte payload of frame at byte {position}"))]
    UnexpectedEof {
        position: u64,
        length:   u32,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },

    /// Index append with a logical offset that does not move forward.
    #[snafu(display("Non-monotonic index append: {attempted} is not greater than {last}"))]
    NonMonotonicOffset {
        last:      u64,
        attempted: u64,
        #[snafu(implicit)]
        loc:       snafu::Location,
    },

    /// Persisted index entries are not strictly increasing.
    #[snafu(display(
        "Corrupt index: entry {position} has logical offset {found} after {previous}"
    ))]
    CorruptIndex {
        position: u64,
        previous: u64,
        found:    u64,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },

    /// The index maps a record the log does not fully hold.
    #[snafu(display(
        "Index refers to a record at byte {physical} but the log holds only {log_len} bytes"
    ))]
    IndexAheadOfLog {
        physical: u64,
        log_len:  u64,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },

    #[snafu(display("Invalid queue configuration: {message}"))]
    InvalidConfig {
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("Record at byte {position} is not valid UTF-8"))]
    InvalidUtf8 {
        position: u64,
        source:   std::str::Utf8Error,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },
}

impl QueueError {
    /// Returns `true` when the error describes damaged on-disk state rather
    /// than a caller mistake or an OS failure.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptLength { .. }
                | Self::UnexpectedEof { .. }
                | Self::CorruptIndex { .. }
                | Self::IndexAheadOfLog { .. }
        )
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_classification() {
        let err = CorruptLengthSnafu {
            position: 0u64,
            length:   u32::MAX,
            max:      16u32,
        }
        .build();
        assert!(err.is_corruption());

        let err = MessageTooLargeSnafu {
            size: 17usize,
            max:  16u32,
        }
        .build();
        assert!(!err.is_corruption());
        assert_eq!(
            err.to_string(),
            "Message too large: 17 bytes exceeds limit of 16"
        );
    }

    #[test]
    fn test_io_error_converts() {
        fn fail() -> Result<()> {
            Err::<(), _>(io::Error::other("disk on fire"))?;
            Ok(())
        }

        assert!(matches!(fail(), Err(QueueError::Io { .. })));
    }
}
