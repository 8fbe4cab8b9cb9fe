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

use std::path::PathBuf;

use crate::{Queue, QueueConfig, Result};

pub struct QueueBuilder {
    config: QueueConfig,
}

impl QueueBuilder {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config: QueueConfig {
                path: path.into(),
                ..Default::default()
            },
        }
    }

    #[must_use]
    pub fn index_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.index_path = Some(path.into());
        self
    }

    #[must_use]
    pub const fn durable(mut self, durable: bool) -> Self {
        self.config.durable = durable;
        self
    }

    #[must_use]
    pub const fn max_message_size(mut self, size: u32) -> Self {
        self.config.max_message_size = size;
        self
    }

    #[must_use]
    pub const fn batch_limit(mut self, limit: u32) -> Self {
        self.config.batch_limit = limit;
        self
    }

    pub fn build(self) -> Result<Queue> { Queue::open(self.config) }
}

impl From<QueueConfig> for QueueBuilder {
    fn from(config: QueueConfig) -> Self { Self { config } }
}
