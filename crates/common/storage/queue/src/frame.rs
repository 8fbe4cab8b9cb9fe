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

//! On-disk record framing for the log file.
//!
//! Records are stored back to back with no file header:
//!
//! ```text
//! ┌─────────────────┬──────────────────────┐
//! │  Length (4B)    │   Payload (variable) │
//! │  big-endian u32 │   raw bytes          │
//! └─────────────────┴──────────────────────┘
//! ```
//!
//! There is no checksum. Only structural damage is detected: a length above
//! the configured ceiling, or a payload that vanishes while being read.
//!
//! A frame whose header or payload is not fully present yet is reported as
//! [`FrameRead::Empty`] or [`FrameRead::Partial`], never as an error. A
//! reader racing a writer that is mid-record must not mistake the gap for
//! corruption.

use std::io::{self, Read, Seek, SeekFrom};

use bytes::{BufMut, Bytes, BytesMut};
use snafu::ensure;

use crate::{
    Result,
    error::{CorruptLengthSnafu, UnexpectedEofSnafu},
};

/// Size of the length prefix in bytes (4 bytes = u32).
pub(crate) const FRAME_HEADER_SIZE: usize = 4;

/// Total on-disk size of a frame carrying `payload_len` bytes.
#[inline]
pub(crate) const fn frame_disk_size(payload_len: usize) -> usize {
    FRAME_HEADER_SIZE + payload_len
}

/// Outcome of reading one frame at a byte position.
#[derive(Debug)]
pub(crate) enum FrameRead {
    /// Fewer than [`FRAME_HEADER_SIZE`] bytes exist at the position.
    Empty,
    /// The header is present but the file does not yet hold the full payload.
    Partial { length: u32 },
    /// A whole frame was read.
    Complete {
        payload:       Bytes,
        /// Byte position of the following frame.
        next_position: u64,
    },
}

/// Encode `payload` as `[len][payload]` into `buf`, replacing its contents.
///
/// The caller has already checked the payload against the size ceiling, which
/// is a `u32`, so the cast cannot truncate.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn encode_frame(buf: &mut BytesMut, payload: &[u8]) {
    buf.clear();
    buf.reserve(frame_disk_size(payload.len()));
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
}

/// Read the frame that starts at `position`.
///
/// The length of the underlying stream is sampled twice: once before the
/// header is read and again before the payload, so a file that grew in
/// between is seen at its newest size.
pub(crate) fn read_frame<R: Read + Seek>(
    reader: &mut R,
    position: u64,
    max_message_size: u32,
) -> Result<FrameRead> {
    let len = stream_len(reader)?;
    if len < position + FRAME_HEADER_SIZE as u64 {
        return Ok(FrameRead::Empty);
    }

    reader.seek(SeekFrom::Start(position))?;
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(FrameRead::Empty),
        Err(e) => return Err(e.into()),
    }
    let length = u32::from_be_bytes(header);

    ensure!(
        length <= max_message_size,
        CorruptLengthSnafu {
            position,
            length,
            max: max_message_size,
        }
    );

    let payload_offset = position + FRAME_HEADER_SIZE as u64;
    let next_position = payload_offset + u64::from(length);
    if stream_len(reader)? < next_position {
        return Ok(FrameRead::Partial { length });
    }

    reader.seek(SeekFrom::Start(payload_offset))?;
    let mut payload = vec![0u8; length as usize];
    match reader.read_exact(&mut payload) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return UnexpectedEofSnafu { position, length }.fail();
        }
        Err(e) => return Err(e.into()),
    }

    Ok(FrameRead::Complete {
        payload: Bytes::from(payload),
        next_position,
    })
}

fn stream_len<S: Seek>(stream: &mut S) -> io::Result<u64> { stream.seek(SeekFrom::End(0)) }
