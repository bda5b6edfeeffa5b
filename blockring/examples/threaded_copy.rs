// SPDX-FileCopyrightText: 2025 Contributors to the blockring project.
// SPDX-License-Identifier: Apache-2.0

//! Producer and consumer threads exchanging a byte stream through a
//! [`SharedBlockRing`].
//!
//! The producer writes a generated pattern at its own pace, the consumer
//! reads in differently sized pieces and verifies the pattern.
//!
//! ```text
//! cargo run -p blockring --example threaded_copy -- --bytes 1000000 --block-size 256
//! ```

mod common;

use std::time::Duration;

use blockring::{SharedBlockRing, config::RingConfig};
use clap::Parser;
use tracing::info;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Total bytes to send.
    #[arg(long, default_value_t = 1 << 20)]
    bytes: usize,

    /// Bytes per ring block.
    #[arg(long, default_value_t = 4096)]
    block_size: usize,

    /// Number of ring blocks.
    #[arg(long, default_value_t = 8)]
    block_count: usize,

    /// Size of each producer write.
    #[arg(long, default_value_t = 1000)]
    write_size: usize,

    /// Size of each consumer read.
    #[arg(long, default_value_t = 333)]
    read_size: usize,
}

fn pattern(index: usize) -> u8 {
    (index % 251) as u8
}

fn main() -> Result<(), blockring::Error> {
    common::setup_logging();
    let args = Args::parse();

    let ring = SharedBlockRing::from_config(&RingConfig::new(args.block_size, args.block_count))?;
    let timeout = Duration::from_secs(5);

    let producer = ring.clone();
    let total = args.bytes;
    let write_size = args.write_size.max(1);
    let handle = std::thread::spawn(move || -> Result<(), blockring::Error> {
        let data: Vec<u8> = (0..total).map(pattern).collect();
        for chunk in data.chunks(write_size) {
            producer.write_all(chunk, timeout)?;
        }
        producer.close();
        Ok(())
    });

    let mut received = 0usize;
    let mut buffer = vec![0u8; args.read_size.max(1)];
    loop {
        let count = ring.read_some(&mut buffer, timeout)?;
        if count == 0 {
            break;
        }
        for (offset, byte) in buffer[..count].iter().enumerate() {
            if *byte != pattern(received + offset) {
                return Err(blockring::Error::Other(format!(
                    "mismatch at byte {}",
                    received + offset
                )));
            }
        }
        received += count;
    }

    handle
        .join()
        .map_err(|_| blockring::Error::Other("producer thread panicked".to_string()))??;

    info!(
        "Received {} byte(s) through {} block(s) of {} byte(s).",
        received, args.block_count, args.block_size
    );
    Ok(())
}
