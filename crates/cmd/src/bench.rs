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

//! Bulk write-then-read timing against a real queue file.

use std::{
    fmt, fs, io,
    path::Path,
    time::{Duration, Instant},
};

use bytes::Bytes;
use diskq_queue::{QueueBuilder, QueueConfig};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use snafu::{ResultExt, Whatever, ensure_whatever};
use tracing::info;

/// Parameters of one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchOptions {
    pub messages:         usize,
    pub message_size:     usize,
    pub durable:          bool,
    pub batch_limit:      u32,
    pub max_message_size: u32,
}

/// Timing of one phase over `messages` records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseStats {
    pub messages: usize,
    pub elapsed:  Duration,
}

impl PhaseStats {
    /// Mean time per message in microseconds.
    pub fn avg_micros(&self) -> f64 {
        if self.messages == 0 {
            return 0.0;
        }
        self.elapsed.as_secs_f64() * 1_000_000.0 / self.messages as f64
    }

    /// Messages per second, 0 when nothing was measured.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.messages as f64 / secs
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BenchReport {
    pub write:      PhaseStats,
    pub read:       PhaseStats,
    pub end_to_end: PhaseStats,
    pub bytes:      u64,
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, stats) in [
            ("write", self.write),
            ("read", self.read),
            ("end-to-end", self.end_to_end),
        ] {
            writeln!(
                f,
                "{name:>10}: {:>8} ms total, {:>10.2} us/msg, {:>12.0} msg/s",
                stats.elapsed.as_millis(),
                stats.avg_micros(),
                stats.throughput()
            )?;
        }
        write!(f, "{:>10}: {} bytes payload", "volume", self.bytes)
    }
}

/// Random lowercase ASCII payloads, generated before any timing starts.
pub fn generate_payloads(count: usize, size: usize, seed: u64) -> Vec<Bytes> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..size).map(|_| rng.gen_range(b'a'..=b'z')).collect())
        .collect()
}

fn remove_if_exists(path: &Path) -> Result<(), Whatever> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = ?path, "Removed file from previous benchmark run");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).whatever_context(format!("failed to remove {}", path.display())),
    }
}

/// Enqueue every payload into a fresh queue at `path`, then dequeue them all
/// from the same handle, checking each one comes back intact.
pub fn run(path: &Path, opts: &BenchOptions) -> Result<BenchReport, Whatever> {
    let payloads = generate_payloads(opts.messages, opts.message_size, 0x00C0_FFEE);
    info!(
        messages = opts.messages,
        size = opts.message_size,
        durable = opts.durable,
        batch_limit = opts.batch_limit,
        "Starting benchmark"
    );

    let config = QueueConfig {
        path: path.to_path_buf(),
        durable: opts.durable,
        batch_limit: opts.batch_limit,
        max_message_size: opts.max_message_size,
        ..Default::default()
    };
    // Reads start at byte 0, so leftovers from an earlier run would be
    // compared against this run's payloads.
    for file in [config.path.clone(), config.index_path()] {
        remove_if_exists(&file)?;
    }

    let queue = QueueBuilder::from(config)
        .build()
        .whatever_context("failed to open queue")?;

    let start = Instant::now();
    for payload in &payloads {
        queue
            .enqueue(payload)
            .whatever_context("enqueue failed during benchmark")?;
    }
    queue.flush().whatever_context("flush failed")?;
    let write_elapsed = start.elapsed();

    let read_start = Instant::now();
    let mut read = 0usize;
    while let Some(payload) = queue.dequeue().whatever_context("dequeue failed")? {
        ensure_whatever!(
            read < payloads.len() && payload == payloads[read],
            "record {read} read back differently than written"
        );
        read += 1;
    }
    let read_elapsed = read_start.elapsed();
    let total = start.elapsed();

    ensure_whatever!(
        read == payloads.len(),
        "read {read} records, wrote {}",
        payloads.len()
    );
    queue.close().whatever_context("close failed")?;

    Ok(BenchReport {
        write:      PhaseStats {
            messages: opts.messages,
            elapsed:  write_elapsed,
        },
        read:       PhaseStats {
            messages: read,
            elapsed:  read_elapsed,
        },
        end_to_end: PhaseStats {
            messages: opts.messages,
            elapsed:  total,
        },
        bytes:      (opts.messages * opts.message_size) as u64,
    })
}
