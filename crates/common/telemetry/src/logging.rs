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

use std::{env, io::IsTerminal, sync::Once};

use bon::Builder;
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use tracing::Subscriber;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter, layer::SubscriberExt, registry::LookupSpan,
};

/// Deserializes a string value, using `Default::default()` if the string is
/// empty.
///
/// Lets configuration files write `log_format = ""` and get the default
/// format instead of a parse error.
///
/// # Errors
/// Returns an error if the non-empty string does not name a valid `T`.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

/// The default directory name for log files when file logging is enabled.
pub const DEFAULT_LOGGING_DIR: &str = "logs";

/// Configuration options for the logging system.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory path for storing log files.
    ///
    /// When non-empty, log files are written here with hourly rotation. If
    /// empty, only stdout logging is used.
    #[default = ""]
    #[builder(default)]
    pub dir: String,

    /// Log level filter string, e.g. "info" or "info,diskq_queue=debug".
    ///
    /// If None, falls back to the RUST_LOG environment variable, then to
    /// "info".
    pub level: Option<String>,

    /// Output format for log messages.
    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Maximum number of rotated log files to retain.
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    /// Whether to output logs to stdout in addition to files.
    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,
}

/// Available log output formats.
#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, for log aggregation.
    ///
    /// ```json
    /// {"timestamp":"2025-01-01T12:00:00Z","level":"INFO","target":"diskq_queue::queue","fields":{"message":"Queue opened"}}
    /// ```
    Json,

    /// Human-readable text, the default.
    #[default]
    Text,
}

/// Default log level filter when neither the options nor RUST_LOG set one.
const DEFAULT_LOG_TARGETS: &str = "info";

/// Resolve the filter string: explicit level first, then RUST_LOG, then
/// [`DEFAULT_LOG_TARGETS`].
fn resolve_targets(level: Option<&str>, env_level: Option<&str>) -> String {
    level
        .or(env_level)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_LOG_TARGETS)
        .to_string()
}

fn fmt_layer<S, W>(writer: W, format: LogFormat, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
    }
}

/// Initialize global logging.
///
/// Sets up a stdout layer (if `append_stdout`), plus an hourly rolling file
/// named after `app_name` and an error-only rolling file when `dir` is set.
///
/// # Returns
///
/// The `WorkerGuard`s of the non-blocking writers. Keep them alive for as
/// long as logs should be written; dropping them flushes and stops the
/// writer threads.
///
/// Only the first call has any effect; later calls return no guards.
///
/// # Panics
///
/// Panics if the log directory cannot be used, the level string does not
/// parse, or another global subscriber is already installed.
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Vec<WorkerGuard> {
    static START: Once = Once::new();
    let mut guards = vec![];

    START.call_once(|| {
        LogTracer::init().expect("log tracer must be valid");

        let stdout_logging_layer = if opts.append_stdout {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            guards.push(guard);
            Some(fmt_layer(
                writer,
                opts.log_format,
                std::io::stdout().is_terminal(),
            ))
        } else {
            None
        };

        let (file_logging_layer, err_file_logging_layer) = if opts.dir.is_empty() {
            (None, None)
        } else {
            let rolling = |prefix: String| {
                RollingFileAppender::builder()
                    .rotation(Rotation::HOURLY)
                    .filename_prefix(prefix)
                    .max_log_files(opts.max_log_files)
                    .build(&opts.dir)
                    .unwrap_or_else(|e| {
                        panic!(
                            "initializing rolling file appender at {} failed: {}",
                            &opts.dir, e
                        )
                    })
            };

            let (writer, guard) = tracing_appender::non_blocking(rolling(app_name.to_string()));
            guards.push(guard);
            let file_layer = fmt_layer(writer, opts.log_format, false);

            let (writer, guard) = tracing_appender::non_blocking(rolling(format!("{app_name}-err")));
            guards.push(guard);
            let err_layer = fmt_layer(writer, opts.log_format, false)
                .with_filter(filter::LevelFilter::ERROR)
                .boxed();

            (Some(file_layer), Some(err_layer))
        };

        let targets = resolve_targets(
            opts.level.as_deref(),
            env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(),
        )
        .parse::<filter::Targets>()
        .expect("error parsing log level string");

        let subscriber = Registry::default()
            .with(targets)
            .with(stdout_logging_layer)
            .with(file_logging_layer)
            .with(err_file_logging_layer);

        tracing::subscriber::set_global_default(subscriber)
            .expect("error setting global tracing subscriber");
    });

    guards
}
