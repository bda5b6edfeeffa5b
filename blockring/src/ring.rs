// SPDX-FileCopyrightText: 2025 Contributors to the blockring project.
// SPDX-License-Identifier: Apache-2.0

//! Fixed-block ring buffers.
//!
//! # Key Types
//!
//! - [`BlockRingBuffer`]: single-owner ring with short-count backpressure
//! - [`SharedBlockRing`]: the same ring behind a mutex, for producer and
//!   consumer threads that block with a timeout
//! - [`Occupancy`]: serializable snapshot of a ring's bookkeeping

pub mod buffer;
pub mod shared;

use serde::Serialize;

/// Point-in-time view of a ring's bookkeeping.
///
/// Handed to observers and embedded in reports; taking one never touches the
/// block storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Occupancy {
    /// Bytes per block.
    pub block_size: usize,
    /// Total number of blocks.
    pub block_count: usize,
    /// Blocks holding committed, unread data.
    pub full_blocks: usize,
    /// Bytes buffered and not yet read (the ring's delay).
    pub queued_bytes: usize,
    /// Bytes the next write would accept.
    pub space: usize,
    /// Index of the block the producer is filling.
    pub write_block: usize,
    /// Index of the block the consumer is draining.
    pub read_block: usize,
    /// Byte offset inside the write block.
    pub write_offset: usize,
    /// Byte offset inside the read block.
    pub read_offset: usize,
    /// Whether the producer has declared end of stream.
    pub sealed: bool,
}

impl Occupancy {
    /// Total bytes the ring can hold.
    pub fn capacity(&self) -> usize {
        self.block_size * self.block_count
    }

    /// Fill level in `[0.0, 1.0]`.
    pub fn fill_ratio(&self) -> f64 {
        let capacity = self.capacity();
        if capacity == 0 {
            0.0
        } else {
            self.queued_bytes as f64 / capacity as f64
        }
    }
}
