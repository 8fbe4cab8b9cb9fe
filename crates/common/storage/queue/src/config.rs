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

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ensure;

use crate::{Result, error::InvalidConfigSnafu};

/// Default per-record payload ceiling: 10 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

/// Default number of appends between forced syncs.
pub const DEFAULT_BATCH_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct QueueConfig {
    /// Log file location.
    #[default(_code = "PathBuf::from(\"./queue.log\")")]
    pub path:             PathBuf,
    /// Index file location. Derived from `path` when unset.
    pub index_path:       Option<PathBuf>,
    /// Sync the log to stable storage every `batch_limit` appends.
    #[default = true]
    pub durable:          bool,
    #[default(DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: u32,
    #[default(DEFAULT_BATCH_LIMIT)]
    pub batch_limit:      u32,
}

impl QueueConfig {
    /// The index file path: the explicit `index_path`, or `path` with its
    /// extension replaced by `index`.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| self.path.with_extension("index"))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(
            !self.path.as_os_str().is_empty(),
            InvalidConfigSnafu {
                message: "log path is empty",
            }
        );
        ensure!(
            self.max_message_size > 0,
            InvalidConfigSnafu {
                message: "max_message_size must be at least 1",
            }
        );
        ensure!(
            self.batch_limit > 0,
            InvalidConfigSnafu {
                message: "batch_limit must be at least 1",
            }
        );
        ensure!(
            self.index_path() != self.path,
            InvalidConfigSnafu {
                message: "index file must differ from the log file",
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueError;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.path, PathBuf::from("./queue.log"));
        assert!(config.durable);
        assert_eq!(config.max_message_size, 10 * 1024 * 1024);
        assert_eq!(config.batch_limit, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_index_path_derivation() {
        let mut config = QueueConfig {
            path: PathBuf::from("/data/queue.log"),
            ..Default::default()
        };
        assert_eq!(config.index_path(), PathBuf::from("/data/queue.index"));

        config.index_path = Some(PathBuf::from("/elsewhere/offsets.idx"));
        assert_eq!(config.index_path(), PathBuf::from("/elsewhere/offsets.idx"));
    }

    #[test]
    fn test_validate_rejects_zero_batch_limit() {
        let config = QueueConfig {
            batch_limit: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(QueueError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_index_colliding_with_log() {
        let config = QueueConfig {
            path: PathBuf::from("queue.index"),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: QueueConfig =
            serde_json::from_str(r#"{"path":"/tmp/q.log","durable":false}"#).unwrap();
        assert_eq!(config.path, PathBuf::from("/tmp/q.log"));
        assert!(!config.durable);
        assert_eq!(config.batch_limit, DEFAULT_BATCH_LIMIT);
    }
}
