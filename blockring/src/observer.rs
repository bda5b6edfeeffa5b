// SPDX-FileCopyrightText: 2025 Contributors to the blockring project.
// SPDX-License-Identifier: Apache-2.0

//! Structured observability hooks for the poll loop.
//!
//! The ring itself performs no I/O and emits nothing. The [`crate::PollLoop`]
//! reports what it does as [`BufferEvent`]s to a [`BufferObserver`], which may
//! log them ([`TracingObserver`]), aggregate them ([`StatsObserver`]) or drop
//! them ([`NullObserver`]).

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, trace};

use crate::{Endpoint, Occupancy, pump::LoopState};

/// Something the poll loop did, with the ring state right after it.
#[derive(Debug, Clone, Copy)]
pub enum BufferEvent<'a> {
    /// Bytes were read from the input and accepted by the ring.
    InputRead {
        /// Bytes accepted.
        bytes: usize,
        /// Ring state after the write.
        occupancy: Occupancy,
    },
    /// Bytes were written to the output.
    OutputWritten {
        /// Bytes the output accepted.
        bytes: usize,
        /// Bytes that were offered.
        attempted: usize,
        /// Ring state at the time of the write.
        occupancy: Occupancy,
    },
    /// One or more blocks became full.
    BlockFilled {
        /// Number of blocks that filled during the last write.
        blocks: usize,
        /// Ring state after the write.
        occupancy: Occupancy,
    },
    /// One or more blocks were completely drained.
    BlockDrained {
        /// Number of blocks freed during the last read.
        blocks: usize,
        /// Ring state after the read.
        occupancy: Occupancy,
    },
    /// The ring filled up; the input stops being polled.
    BufferFull {
        /// Ring state at the time it filled.
        occupancy: Occupancy,
    },
    /// The loop moved between states.
    StateChanged {
        /// Previous state.
        from: LoopState,
        /// New state.
        to: LoopState,
    },
    /// A descriptor reported an error.
    IoError {
        /// Side that failed.
        endpoint: Endpoint,
        /// Size of the attempted transfer.
        attempted: usize,
        /// Whether the error is retried without counting against the budget.
        transient: bool,
        /// The reported error.
        error: &'a std::io::Error,
    },
}

/// Receives [`BufferEvent`]s from a poll loop.
pub trait BufferObserver: Send + Sync {
    /// Called synchronously from the loop; keep it cheap.
    fn on_event(&self, event: &BufferEvent<'_>);
}

impl<T: BufferObserver + ?Sized> BufferObserver for Arc<T> {
    fn on_event(&self, event: &BufferEvent<'_>) {
        (**self).on_event(event)
    }
}

impl<A: BufferObserver, B: BufferObserver> BufferObserver for (A, B) {
    fn on_event(&self, event: &BufferEvent<'_>) {
        self.0.on_event(event);
        self.1.on_event(event);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl BufferObserver for NullObserver {
    fn on_event(&self, _event: &BufferEvent<'_>) {}
}

/// Forwards events to `tracing`.
///
/// Transfers go out at `TRACE`, block and state transitions at `DEBUG`.
/// Descriptor errors are already logged by the loop at `WARN`; here they are
/// repeated at `DEBUG` with the transient flag.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BufferObserver for TracingObserver {
    fn on_event(&self, event: &BufferEvent<'_>) {
        match *event {
            BufferEvent::InputRead { bytes, occupancy } => trace!(
                bytes,
                queued = occupancy.queued_bytes,
                space = occupancy.space,
                "input read"
            ),
            BufferEvent::OutputWritten {
                bytes,
                attempted,
                occupancy,
            } => trace!(
                bytes,
                attempted,
                queued = occupancy.queued_bytes,
                "output written"
            ),
            BufferEvent::BlockFilled { blocks, occupancy } => debug!(
                blocks,
                full_blocks = occupancy.full_blocks,
                block_count = occupancy.block_count,
                "block(s) filled"
            ),
            BufferEvent::BlockDrained { blocks, occupancy } => debug!(
                blocks,
                full_blocks = occupancy.full_blocks,
                block_count = occupancy.block_count,
                "block(s) drained"
            ),
            BufferEvent::BufferFull { occupancy } => debug!(
                queued = occupancy.queued_bytes,
                "ring full, pausing input"
            ),
            BufferEvent::StateChanged { from, to } => debug!(?from, ?to, "poll loop state"),
            BufferEvent::IoError {
                endpoint,
                attempted,
                transient,
                error,
            } => debug!(%endpoint, attempted, transient, "I/O error: {}", error),
        }
    }
}

/// Counters aggregated by [`StatsObserver`].
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct TransferStats {
    /// Bytes accepted from the input.
    pub bytes_in: u64,
    /// Bytes delivered to the output.
    pub bytes_out: u64,
    /// Number of input reads that delivered data.
    pub input_reads: u64,
    /// Number of output writes, partial ones included.
    pub output_writes: u64,
    /// Output writes that accepted fewer bytes than offered.
    pub partial_writes: u64,
    /// Blocks that became full.
    pub blocks_filled: u64,
    /// Blocks that were drained.
    pub blocks_drained: u64,
    /// Times the ring filled up and the input was paused.
    pub full_stalls: u64,
    /// Descriptor errors, transient ones included.
    pub io_errors: u64,
    /// Highest number of bytes buffered at once.
    pub peak_queued_bytes: usize,
}

/// Aggregates events into [`TransferStats`].
///
/// Clones share the same counters, so one handle can be given to the loop and
/// another kept for reading the results.
#[derive(Debug, Default, Clone)]
pub struct StatsObserver {
    inner: Arc<Mutex<TransferStats>>,
}

impl StatsObserver {
    /// Creates an observer with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the counters.
    pub fn snapshot(&self) -> TransferStats {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Zeroes the counters.
    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = TransferStats::default();
        }
    }
}

impl BufferObserver for StatsObserver {
    fn on_event(&self, event: &BufferEvent<'_>) {
        let Ok(mut stats) = self.inner.lock() else {
            return;
        };
        match *event {
            BufferEvent::InputRead { bytes, occupancy } => {
                stats.bytes_in += bytes as u64;
                stats.input_reads += 1;
                stats.peak_queued_bytes = stats.peak_queued_bytes.max(occupancy.queued_bytes);
            }
            BufferEvent::OutputWritten {
                bytes, attempted, ..
            } => {
                stats.bytes_out += bytes as u64;
                stats.output_writes += 1;
                if bytes < attempted {
                    stats.partial_writes += 1;
                }
            }
            BufferEvent::BlockFilled { blocks, .. } => stats.blocks_filled += blocks as u64,
            BufferEvent::BlockDrained { blocks, .. } => stats.blocks_drained += blocks as u64,
            BufferEvent::BufferFull { .. } => stats.full_stalls += 1,
            BufferEvent::StateChanged { .. } => {}
            BufferEvent::IoError { .. } => stats.io_errors += 1,
        }
    }
}
