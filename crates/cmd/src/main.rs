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

use clap::{Args, Parser, Subcommand, ValueEnum};
use diskq_common_telemetry::{LogFormat, LoggingOptions, init_global_logging, set_panic_hook};
use diskq_queue::{DEFAULT_BATCH_LIMIT, DEFAULT_MAX_MESSAGE_SIZE, QueueBuilder};
use snafu::{ResultExt, Whatever};

mod bench;
mod build_info;

#[derive(Debug, Parser)]
#[clap(
name = "diskq",
about= "Persistent append-only queue on a single log file",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION,
long_version = build_info::LONG_VERSION)]
struct Cli {
    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Clone, Args)]
struct LoggingArgs {
    /// Log filter, e.g. "info" or "diskq_queue=debug". Falls back to RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Directory for rolling log files. Stdout only when unset.
    #[arg(long, global = true)]
    log_dir: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    log_format: LogFormatArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}

impl LoggingArgs {
    fn options(&self) -> LoggingOptions {
        LoggingOptions {
            dir: self.log_dir.clone().unwrap_or_default(),
            level: self.log_level.clone(),
            log_format: self.log_format.into(),
            // Keep stdout free for command output.
            append_stdout: false,
            ..Default::default()
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Demo(DemoArgs),
    Enqueue(EnqueueArgs),
    Dequeue(DequeueArgs),
    Read(ReadArgs),
    Bench(BenchArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Write three messages, close the queue, reopen it and print everything back.
Examples:

diskq demo --path /tmp/demo.log

")]
struct DemoArgs {
    #[arg(long, default_value = "./queue.log")]
    path: PathBuf,
}

impl DemoArgs {
    fn run(&self) -> Result<(), Whatever> {
        let queue = QueueBuilder::new(&self.path)
            .build()
            .whatever_context("failed to open queue")?;
        for message in ["Hello", "World", "Persistent Queue"] {
            let offset = queue
                .enqueue_str(message)
                .whatever_context("failed to enqueue")?;
            println!("enqueued #{offset}: {message}");
        }
        queue.flush().whatever_context("failed to flush")?;
        queue.close().whatever_context("failed to close")?;

        let queue = QueueBuilder::new(&self.path)
            .build()
            .whatever_context("failed to reopen queue")?;
        while let Some(message) = queue
            .dequeue_string()
            .whatever_context("failed to dequeue")?
        {
            println!("dequeued: {message}");
        }
        queue.close().whatever_context("failed to close")
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Append each MESSAGE as one record and print its logical offset.
Examples:

diskq enqueue --path /tmp/q.log first second third

")]
struct EnqueueArgs {
    #[arg(long)]
    path: PathBuf,

    /// Skip fdatasync batching.
    #[arg(long)]
    no_durable: bool,

    #[arg(required = true)]
    messages: Vec<String>,
}

impl EnqueueArgs {
    fn run(&self) -> Result<(), Whatever> {
        let queue = QueueBuilder::new(&self.path)
            .durable(!self.no_durable)
            .build()
            .whatever_context("failed to open queue")?;
        for message in &self.messages {
            let offset = queue
                .enqueue_str(message)
                .whatever_context("failed to enqueue")?;
            println!("{offset}");
        }
        queue.close().whatever_context("failed to close")
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Print records from the start of the log until it is exhausted.
Examples:

diskq dequeue --path /tmp/q.log --limit 10

")]
struct DequeueArgs {
    #[arg(long)]
    path: PathBuf,

    /// Stop after this many records.
    #[arg(long)]
    limit: Option<usize>,
}

impl DequeueArgs {
    fn run(&self) -> Result<(), Whatever> {
        let queue = QueueBuilder::new(&self.path)
            .build()
            .whatever_context("failed to open queue")?;
        let limit = self.limit.unwrap_or(usize::MAX);
        let mut printed = 0;
        while printed < limit {
            let Some(payload) = queue.dequeue().whatever_context("failed to dequeue")? else {
                break;
            };
            println!("{}", String::from_utf8_lossy(&payload));
            printed += 1;
        }
        queue.close().whatever_context("failed to close")
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Print the record with logical offset OFFSET without consuming anything.
Examples:

diskq read --path /tmp/q.log 42

")]
struct ReadArgs {
    #[arg(long)]
    path: PathBuf,

    offset: u64,
}

impl ReadArgs {
    fn run(&self) -> Result<(), Whatever> {
        let queue = QueueBuilder::new(&self.path)
            .build()
            .whatever_context("failed to open queue")?;
        match queue
            .read_at(self.offset)
            .whatever_context("failed to read")?
        {
            Some(payload) => println!("{}", String::from_utf8_lossy(&payload)),
            None => snafu::whatever!("no record at offset {}", self.offset),
        }
        queue.close().whatever_context("failed to close")
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Write N random messages, read them back and report timings.
Examples:

diskq bench --path /tmp/bench.log --messages 10000 --size 10240

")]
struct BenchArgs {
    #[arg(long)]
    path: PathBuf,

    #[arg(long, default_value_t = 10_000)]
    messages: usize,

    /// Payload size in bytes.
    #[arg(long, default_value_t = 10 * 1024)]
    size: usize,

    #[arg(long, default_value_t = DEFAULT_BATCH_LIMIT)]
    batch_limit: u32,

    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: u32,

    #[arg(long)]
    no_durable: bool,
}

impl BenchArgs {
    fn run(&self) -> Result<(), Whatever> {
        let report = bench::run(&self.path, &bench::BenchOptions {
            messages:         self.messages,
            message_size:     self.size,
            durable:          !self.no_durable,
            batch_limit:      self.batch_limit,
            max_message_size: self.max_message_size,
        })?;
        println!("{report}");
        Ok(())
    }
}

fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    let _guards = init_global_logging("diskq", &cli.logging.options());
    set_panic_hook();
    tracing::debug!(version = build_info::FULL_VERSION, "diskq starting");

    match cli.commands {
        Commands::Demo(args) => args.run(),
        Commands::Enqueue(args) => args.run(),
        Commands::Dequeue(args) => args.run(),
        Commands::Read(args) => args.run(),
        Commands::Bench(args) => args.run(),
    }
}
