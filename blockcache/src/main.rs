// SPDX-FileCopyrightText: 2025 Contributors to the blockring project.
// SPDX-License-Identifier: Apache-2.0

//! `blockcache`: buffers a byte stream between an input and an output through
//! a block ring.
//!
//! Reads stdin (or `--input`) and writes stdout (or `--output`). The input is
//! paused while the ring is full, so a stalled consumer never makes the cache
//! grow. On end of input the ring is drained and the process exits normally;
//! Ctrl-C stops the loop at its next iteration.
//!
//! ```text
//! curl -s http://host/stream.ts | blockcache --block-size 8192 --block-count 512 | player -
//! ```

use std::{
    fs::File,
    io,
    os::fd::{AsFd, AsRawFd},
    path::{Path, PathBuf},
};

use blockring::{
    Error, PollLoop, Result, RunReport, StatsObserver, TracingObserver, TransferStats,
    config::CacheConfig, set_nonblocking,
};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON configuration file; flags below override its values.
    #[arg(short, long, env = "BLOCKCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Bytes per ring block.
    #[arg(long, env = "BLOCKCACHE_BLOCK_SIZE")]
    block_size: Option<usize>,

    /// Number of ring blocks.
    #[arg(long, env = "BLOCKCACHE_BLOCK_COUNT")]
    block_count: Option<usize>,

    /// Upper bound on one readiness wait, in milliseconds.
    #[arg(long)]
    poll_timeout_ms: Option<u64>,

    /// Largest transfer per readiness event, in bytes.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Consecutive I/O failures tolerated per descriptor.
    #[arg(long)]
    max_io_retries: Option<u32>,

    /// Read from this file instead of stdin.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Write to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Put the output descriptor into non-blocking mode.
    #[arg(long)]
    nonblocking_output: bool,

    /// Print the run report and transfer statistics as JSON on stderr.
    #[arg(long)]
    stats: bool,
}

impl Args {
    fn cache_config(&self) -> Result<CacheConfig> {
        let mut config = match &self.config {
            Some(path) => CacheConfig::from_file(path)?,
            None => CacheConfig::default(),
        };
        if let Some(block_size) = self.block_size {
            config.ring.block_size = block_size;
        }
        if let Some(block_count) = self.block_count {
            config.ring.block_count = block_count;
        }
        if let Some(poll_timeout_ms) = self.poll_timeout_ms {
            config.poll_timeout_ms = poll_timeout_ms;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(max_io_retries) = self.max_io_retries {
            config.max_io_retries = max_io_retries;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Serialize)]
struct StatsOutput<'a> {
    report: &'a RunReport,
    transfer: TransferStats,
}

/// Opens `path`, or duplicates the given standard stream into an unbuffered file.
fn open_endpoint<F: AsFd>(path: Option<&Path>, write: bool, standard: F) -> Result<File> {
    let opened = match path {
        Some(path) if write => File::create(path),
        Some(path) => File::open(path),
        None => standard.as_fd().try_clone_to_owned().map(File::from),
    };
    opened.map_err(|error| {
        Error::Config(format!(
            "Failed to open {} \"{}\": {}",
            if write { "output" } else { "input" },
            path.map_or_else(|| "-".to_string(), |path| path.display().to_string()),
            error
        ))
    })
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();
}

fn run(args: &Args) -> Result<()> {
    let config = args.cache_config()?;
    let input = open_endpoint(args.input.as_deref(), false, io::stdin())?;
    let output = open_endpoint(args.output.as_deref(), true, io::stdout())?;
    if args.nonblocking_output {
        set_nonblocking(output.as_raw_fd())
            .map_err(|error| Error::Other(format!("Failed to set O_NONBLOCK: {error}")))?;
    }

    let stats = StatsObserver::new();
    let mut cache =
        PollLoop::new(input, output, &config)?.with_observer((TracingObserver, stats.clone()));

    let cancel = cache.cancel_token();
    ctrlc::set_handler(move || cancel.cancel())
        .map_err(|error| Error::Other(format!("Failed to install Ctrl-C handler: {error}")))?;

    info!(
        block_size = config.ring.block_size,
        block_count = config.ring.block_count,
        "caching stream"
    );
    let report = cache.run()?;
    if report.cancelled {
        info!(
            queued = report.occupancy.queued_bytes,
            "interrupted, discarding buffered data"
        );
    } else {
        info!(
            bytes = report.bytes_out,
            iterations = report.iterations,
            "stream drained"
        );
    }

    if args.stats {
        let output = StatsOutput {
            report: &report,
            transfer: stats.snapshot(),
        };
        eprintln!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

fn main() -> std::process::ExitCode {
    setup_logging();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            error!("blockcache failed: {}", err);
            std::process::ExitCode::FAILURE
        }
    }
}
