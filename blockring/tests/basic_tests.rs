// SPDX-FileCopyrightText: 2025 Contributors to the blockring project.
// SPDX-License-Identifier: Apache-2.0

//! Basic integration tests for the ring buffer and the poll loop.
//!
//! # Test Coverage
//!
//! - Block bookkeeping on the small reference scenario (4-byte blocks, 2 blocks)
//! - Backpressure, empty reads and FIFO order across wraparound
//! - Delay/space reconciliation after every operation
//! - End-to-end copies through a `PollLoop` over Unix socket pairs

use std::{
    io::{Read, Write},
    os::unix::net::UnixStream,
    thread,
};

use blockring::{
    BlockRingBuffer, LoopState, PollLoop, StatsObserver, TracingObserver,
    config::{CacheConfig, RingConfig},
    set_nonblocking,
};
use tracing::info;

/// Ensures logging is initialized only once across all tests.
static LOG_ONCE: std::sync::Once = std::sync::Once::new();

fn setup_logging() {
    // Respects RUST_LOG, defaults to INFO.
    LOG_ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with_test_writer()
            .init();
    });
}

/// Asserts the reconciliation between delay and space:
/// `get_delay() + get_space() == capacity - read_offset`.
fn assert_reconciled(ring: &BlockRingBuffer) {
    assert!(ring.full_blocks() <= ring.block_count());
    assert_eq!(
        ring.get_delay() + ring.get_space(),
        ring.capacity() - ring.read_offset()
    );
}

/// The 4-byte x 2-block walkthrough: fill, refuse, partial drain, retry.
#[test]
fn reference_scenario() {
    let mut ring = BlockRingBuffer::new(4, 2).unwrap();
    assert_eq!(ring.capacity(), 8);

    let mut progression = vec![ring.full_blocks()];
    for byte in b"ABCDEFGH" {
        assert_eq!(ring.write(std::slice::from_ref(byte)), 1);
        if *progression.last().unwrap() != ring.full_blocks() {
            progression.push(ring.full_blocks());
        }
        assert_reconciled(&ring);
    }
    assert_eq!(progression, vec![0, 1, 2]);
    assert_eq!(ring.get_delay(), 8);

    assert_eq!(ring.write(b"Z"), 0);
    assert_reconciled(&ring);

    let mut out = [0u8; 3];
    assert_eq!(ring.read(&mut out), 3);
    assert_eq!(&out, b"ABC");
    assert_eq!(ring.full_blocks(), 2);
    assert_eq!(ring.get_space(), 0);
    assert_reconciled(&ring);

    let mut out = [0u8; 1];
    assert_eq!(ring.read(&mut out), 1);
    assert_eq!(&out, b"D");
    assert_eq!(ring.full_blocks(), 1);
    assert_eq!(ring.get_space(), 4);
    assert_reconciled(&ring);

    assert_eq!(ring.write(b"Z"), 1);
    assert_eq!(ring.get_delay(), 5);
    assert_reconciled(&ring);
}

#[test]
fn write_then_read_within_space_is_lossless() {
    let mut ring = BlockRingBuffer::new(16, 4).unwrap();
    ring.write(b"0123456789abcdefXYZ");
    let mut scratch = [0u8; 16];
    ring.read(&mut scratch);

    // Everything up to get_space() round-trips, rounded down to whole blocks
    // because a partial block is not readable until it fills.
    let space = ring.get_space();
    let readable_before = ring.readable();
    let payload: Vec<u8> = (0..space as u32).map(|i| (i * 7) as u8).collect();
    assert_eq!(ring.write(&payload), space);

    let mut out = vec![0u8; ring.readable()];
    assert_eq!(ring.read(&mut out), out.len());
    let mut expected = b"XYZ".to_vec();
    expected.extend_from_slice(&payload);
    expected.truncate(out.len());
    assert_eq!(readable_before, 0);
    assert_eq!(out, expected);
}

#[test]
fn overfilling_returns_exactly_capacity() {
    for (block_size, block_count) in [(1, 1), (4, 2), (16, 4), (7, 9)] {
        let mut ring = BlockRingBuffer::new(block_size, block_count).unwrap();
        let capacity = block_size * block_count;
        let data = vec![0x5Au8; capacity + 17];
        assert_eq!(ring.write(&data), capacity);
        assert_eq!(ring.full_blocks(), block_count);
        assert_eq!(ring.get_delay(), capacity);
        assert_eq!(ring.get_space(), 0);
    }
}

#[test]
fn empty_read_returns_zero_without_mutation() {
    let mut ring = BlockRingBuffer::new(16, 4).unwrap();
    ring.write(b"abc");
    let before = ring.occupancy();
    let mut out = [0xFFu8; 8];
    assert_eq!(ring.read(&mut out), 0);
    assert_eq!(ring.occupancy(), before);
    assert_eq!(out, [0xFFu8; 8]);
}

/// Writes 200 bytes through a 4 x 16 ring with interleaved partial reads, so
/// both block indices wrap at least twice.
#[test]
fn fifo_order_across_wraparound() {
    let mut ring = BlockRingBuffer::new(16, 4).unwrap();
    let source: Vec<u8> = (0..200u32).map(|i| (i % 256) as u8).collect();
    let mut written = 0;
    let mut received = Vec::new();
    let mut write_sizes = [13usize, 7, 29, 3].iter().cycle();
    let mut read_sizes = [5usize, 17, 11].iter().cycle();

    while received.len() < source.len() {
        if written < source.len() {
            let end = (written + write_sizes.next().unwrap()).min(source.len());
            written += ring.write(&source[written..end]);
            if written == source.len() {
                ring.seal();
            }
        }
        let mut out = vec![0u8; *read_sizes.next().unwrap()];
        let count = ring.read(&mut out);
        received.extend_from_slice(&out[..count]);
        if !ring.is_sealed() {
            assert_reconciled(&ring);
        }
    }

    assert_eq!(received, source);
    assert!(ring.is_empty());
}

#[test]
fn from_config_matches_geometry() {
    let ring = BlockRingBuffer::from_config(&RingConfig::new(32, 3)).unwrap();
    assert_eq!(ring.block_size(), 32);
    assert_eq!(ring.block_count(), 3);
    assert_eq!(ring.capacity(), 96);
    assert_eq!(ring.get_space(), 96);
    assert_eq!(ring.get_delay(), 0);
}

/// Copies a stream between two socket pairs through a small ring and checks
/// the output is byte-identical.
#[test]
fn poll_loop_copies_between_sockets() {
    setup_logging();

    let (mut producer, input) = UnixStream::pair().unwrap();
    let (output, mut consumer) = UnixStream::pair().unwrap();

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
    let sent = payload.clone();
    let writer = thread::spawn(move || {
        for chunk in sent.chunks(1_500) {
            producer.write_all(chunk).unwrap();
        }
        // Dropping the producer is the end of input.
    });
    let reader = thread::spawn(move || {
        let mut received = Vec::new();
        consumer.read_to_end(&mut received).unwrap();
        received
    });

    let config = CacheConfig {
        ring: RingConfig::new(512, 8),
        poll_timeout_ms: 50,
        ..Default::default()
    };
    let stats = StatsObserver::new();
    let mut cache = PollLoop::new(input, output, &config)
        .unwrap()
        .with_observer((TracingObserver, stats.clone()));
    let report = cache.run().unwrap();
    drop(cache);

    writer.join().unwrap();
    let received = reader.join().unwrap();

    assert_eq!(report.state, LoopState::Done);
    assert_eq!(report.bytes_in, payload.len() as u64);
    assert_eq!(report.bytes_out, payload.len() as u64);
    assert_eq!(received, payload);

    let stats = stats.snapshot();
    info!(
        "Copied {} byte(s) in {} iteration(s), peak {} byte(s) queued.",
        report.bytes_out, report.iterations, stats.peak_queued_bytes
    );
    assert!(stats.peak_queued_bytes <= 512 * 8);
    assert_eq!(stats.bytes_out, payload.len() as u64);
}

/// A slow consumer makes the ring fill; the input must pause rather than
/// overrun it, and the loop still delivers everything.
#[test]
fn poll_loop_survives_slow_consumer() {
    setup_logging();

    let (mut producer, input) = UnixStream::pair().unwrap();
    let (output, mut consumer) = UnixStream::pair().unwrap();

    let payload = vec![0x42u8; 64 * 1024];
    let sent = payload.clone();
    let writer = thread::spawn(move || {
        producer.write_all(&sent).unwrap();
    });
    let reader = thread::spawn(move || {
        let mut received = Vec::new();
        let mut chunk = [0u8; 97];
        loop {
            let count = consumer.read(&mut chunk).unwrap();
            if count == 0 {
                break;
            }
            received.extend_from_slice(&chunk[..count]);
            thread::sleep(std::time::Duration::from_micros(50));
        }
        received
    });

    let config = CacheConfig {
        ring: RingConfig::new(64, 4),
        poll_timeout_ms: 20,
        ..Default::default()
    };
    let mut cache = PollLoop::new(input, output, &config).unwrap();
    let report = cache.run().unwrap();
    let (_input, output, ring) = cache.into_parts();
    assert!(ring.is_empty());
    drop(output);

    writer.join().unwrap();
    assert_eq!(reader.join().unwrap().len(), payload.len());
    assert_eq!(report.bytes_out, payload.len() as u64);
}

/// A non-blocking sink smaller than one transfer reports `WouldBlock`
/// instead of stalling the loop; the stream still arrives intact.
#[test]
fn poll_loop_with_nonblocking_sink() {
    setup_logging();

    let (mut producer, input) = UnixStream::pair().unwrap();
    let (output, mut consumer) = UnixStream::pair().unwrap();
    set_nonblocking(std::os::fd::AsRawFd::as_raw_fd(&output)).unwrap();

    let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 241) as u8).collect();
    let sent = payload.clone();
    let writer = thread::spawn(move || {
        producer.write_all(&sent).unwrap();
    });
    let reader = thread::spawn(move || {
        let mut received = Vec::new();
        let mut chunk = [0u8; 333];
        loop {
            let count = consumer.read(&mut chunk).unwrap();
            if count == 0 {
                break;
            }
            received.extend_from_slice(&chunk[..count]);
            thread::sleep(std::time::Duration::from_micros(20));
        }
        received
    });

    let config = CacheConfig {
        ring: RingConfig::new(4096, 64),
        poll_timeout_ms: 20,
        chunk_size: 256 * 1024,
        max_io_retries: 0,
    };
    let mut cache = PollLoop::new(input, output, &config).unwrap();
    let report = cache.run().unwrap();
    drop(cache);

    writer.join().unwrap();
    assert_eq!(report.state, LoopState::Done);
    assert_eq!(reader.join().unwrap(), payload);
}

/// Cancelling from another thread stops a loop whose input never ends.
#[test]
fn poll_loop_honours_cancellation() {
    setup_logging();

    let (_producer, input) = UnixStream::pair().unwrap();
    let (output, _consumer) = UnixStream::pair().unwrap();

    let config = CacheConfig {
        ring: RingConfig::new(16, 2),
        poll_timeout_ms: 10,
        ..Default::default()
    };
    let mut cache = PollLoop::new(input, output, &config).unwrap();
    let cancel = cache.cancel_token();
    let canceller = thread::spawn(move || {
        thread::sleep(std::time::Duration::from_millis(50));
        cancel.cancel();
    });

    let report = cache.run().unwrap();
    canceller.join().unwrap();
    assert!(report.cancelled);
    assert_eq!(report.state, LoopState::Streaming);
    assert_eq!(report.bytes_in, 0);
}
