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

//! Single-writer persistent log with a companion offset index.
//!
//! Producers append byte records with [`Queue::enqueue`], consumers read them
//! back in order with [`Queue::dequeue`] or jump to any record by logical
//! offset with [`Queue::read_at`]. Two files back a queue:
//!
//! - the log, a sequence of `[u32 length][payload]` frames
//! - the index, a sequence of `[u64 logical][u64 physical]` entries
//!
//! Both are big-endian with no file header. See [`index`] for the index
//! layout and its crash-recovery rules.

pub mod builder;
pub mod config;
pub mod error;
mod frame;
pub mod index;
pub mod queue;
pub mod recovery;

pub use builder::QueueBuilder;
pub use config::{DEFAULT_BATCH_LIMIT, DEFAULT_MAX_MESSAGE_SIZE, QueueConfig};
pub use error::{QueueError, Result};
pub use index::{INDEX_ENTRY_SIZE, IndexEntry, OffsetIndex};
pub use queue::Queue;
pub use recovery::TailState;
