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

//! Open-time inspection of the log tail against the index.
//!
//! The index is written after the log, so after a crash the log may hold
//! frames the index never heard of, or a frame cut short mid-write. This
//! module walks the log forward from the last indexed frame and reports what
//! it finds. It never modifies either file; acting on the result is up to
//! [`Queue::open`](crate::Queue::open).

use std::{fs::File, path::Path};

use tracing::{debug, warn};

use crate::{
    Result,
    frame::{FrameRead, read_frame},
    index::IndexEntry,
};

/// What lies in the log past the last indexed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    /// The log ends exactly after the last indexed frame.
    Clean,
    /// Complete frames exist that have no index entry.
    UnindexedFrames { count: u64, end: u64 },
    /// A frame starting at `position` was only partly written. `unindexed`
    /// complete frames precede it. `position` always lies past the last
    /// indexed frame.
    TornFrame { position: u64, unindexed: u64 },
    /// The index refers to a frame the log does not fully contain.
    IndexAhead { physical: u64, log_len: u64 },
}

/// Walk the log at `path` from the frame recorded by `last`.
///
/// A frame with an out-of-range length stops the walk with a warning; the
/// reader will surface it as corruption when it gets there.
pub(crate) fn inspect_tail(
    path: &Path,
    last: Option<IndexEntry>,
    max_message_size: u32,
) -> Result<TailState> {
    let mut file = File::open(path)?;
    let log_len = file.metadata()?.len();

    let mut position = match last {
        None => 0,
        Some(entry) if entry.physical >= log_len => {
            warn!(
                path = ?path,
                logical = entry.logical,
                physical = entry.physical,
                log_len,
                "Index refers past the end of the log"
            );
            return Ok(TailState::IndexAhead {
                physical: entry.physical,
                log_len,
            });
        }
        Some(entry) => match read_frame(&mut file, entry.physical, max_message_size)? {
            FrameRead::Complete { next_position, .. } => next_position,
            FrameRead::Empty | FrameRead::Partial { .. } => {
                warn!(
                    path = ?path,
                    logical = entry.logical,
                    physical = entry.physical,
                    log_len,
                    "Last indexed frame is incomplete in the log"
                );
                return Ok(TailState::IndexAhead {
                    physical: entry.physical,
                    log_len,
                });
            }
        },
    };

    let mut unindexed = 0u64;
    loop {
        match read_frame(&mut file, position, max_message_size) {
            Ok(FrameRead::Complete { next_position, .. }) => {
                position = next_position;
                unindexed += 1;
            }
            Ok(FrameRead::Empty) if position == log_len => break,
            Ok(FrameRead::Empty | FrameRead::Partial { .. }) => {
                warn!(
                    path = ?path,
                    position,
                    log_len,
                    unindexed,
                    "Truncated frame found at end of log"
                );
                return Ok(TailState::TornFrame {
                    position,
                    unindexed,
                });
            }
            Err(e) if e.is_corruption() => {
                warn!(path = ?path, position, error = %e, "Stopping tail inspection at bad frame");
                break;
            }
            Err(e) => return Err(e),
        }
    }

    if unindexed == 0 {
        debug!(path = ?path, log_len, "Log tail is clean");
        return Ok(TailState::Clean);
    }

    warn!(
        path = ?path,
        unindexed,
        end = position,
        "Log holds frames without index entries"
    );
    Ok(TailState::UnindexedFrames {
        count: unindexed,
        end:   position,
    })
}
