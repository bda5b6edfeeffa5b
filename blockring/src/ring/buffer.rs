// SPDX-FileCopyrightText: 2025 Contributors to the blockring project.
// SPDX-License-Identifier: Apache-2.0

//! Single-owner block ring buffer.

use std::fmt;

use crate::{Error, Occupancy, Result, config::RingConfig};

/// Fixed-capacity circular byte queue divided into equally sized blocks.
///
/// A producer appends with [`Self::write`] and a consumer removes with
/// [`Self::read`]. Both copy byte-granular ranges but account in whole
/// blocks: a block becomes readable only once it has been completely written,
/// and becomes writable again only once it has been completely read. Neither
/// call ever fails; running out of space or data shows up as a short count.
///
/// All blocks live in one arena of `block_size * block_count` bytes, so a
/// block boundary is plain arithmetic on the offset.
///
/// # End of stream
///
/// A stream whose length is not a multiple of the block size leaves a
/// partially written block behind. [`Self::seal`] declares that no more data
/// follows, after which [`Self::read`] also hands out that tail.
///
/// # Examples
///
/// ```
/// use blockring::BlockRingBuffer;
///
/// # fn main() -> Result<(), blockring::Error> {
/// let mut ring = BlockRingBuffer::new(4, 2)?;
/// assert_eq!(ring.write(b"ABCDEFGHZ"), 8); // ninth byte does not fit
///
/// let mut out = [0u8; 3];
/// assert_eq!(ring.read(&mut out), 3);
/// assert_eq!(&out, b"ABC");
/// assert_eq!(ring.get_space(), 0); // block 0 is not fully drained yet
/// # Ok(())
/// # }
/// ```
pub struct BlockRingBuffer {
    storage: Box<[u8]>,
    block_size: usize,
    block_count: usize,
    write_block: usize,
    read_block: usize,
    write_offset: usize,
    read_offset: usize,
    full_blocks: usize,
    queued: usize,
    sealed: bool,
}

impl BlockRingBuffer {
    /// Allocates a ring of `block_count` blocks of `block_size` bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if either parameter is zero or the total
    ///   size overflows
    /// - [`Error::OutOfMemory`] if the arena cannot be reserved
    pub fn new(block_size: usize, block_count: usize) -> Result<Self> {
        Self::from_config(&RingConfig::new(block_size, block_count))
    }

    /// Allocates a ring with the geometry described by `config`.
    pub fn from_config(config: &RingConfig) -> Result<Self> {
        config.validate()?;
        let bytes = config.block_size * config.block_count;

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(bytes)
            .map_err(|_| Error::OutOfMemory { bytes })?;
        storage.resize(bytes, 0u8);

        Ok(Self {
            storage: storage.into_boxed_slice(),
            block_size: config.block_size,
            block_count: config.block_count,
            write_block: 0,
            read_block: 0,
            write_offset: 0,
            read_offset: 0,
            full_blocks: 0,
            queued: 0,
            sealed: false,
        })
    }

    /// Copies as much of `data` as fits and returns the number of bytes taken.
    ///
    /// A return value smaller than `data.len()` means the ring filled up; the
    /// caller keeps the remainder and retries once the consumer has drained a
    /// block. Returns 0 once the ring is sealed.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.sealed {
            return 0;
        }

        let mut written = 0;
        while written < data.len() && self.full_blocks < self.block_count {
            let count = (data.len() - written).min(self.block_size - self.write_offset);
            let start = self.block_start(self.write_block) + self.write_offset;
            self.storage[start..start + count].copy_from_slice(&data[written..written + count]);
            self.write_offset += count;
            written += count;

            if self.write_offset == self.block_size {
                self.write_offset = 0;
                self.write_block = self.next_block(self.write_block);
                self.full_blocks += 1;
            }
        }

        self.queued += written;
        self.debug_check();
        written
    }

    /// Copies up to `out.len()` buffered bytes into `out`, oldest first.
    ///
    /// Only completely written blocks are handed out, unless the ring is
    /// sealed, in which case the partial tail block follows them. Reading an
    /// empty ring returns 0 and changes nothing.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let mut read = 0;
        while read < out.len() {
            let available = if self.full_blocks > 0 {
                self.block_size - self.read_offset
            } else if self.sealed {
                // Read and write block coincide here.
                self.write_offset - self.read_offset
            } else {
                0
            };
            if available == 0 {
                break;
            }

            let count = (out.len() - read).min(available);
            let start = self.block_start(self.read_block) + self.read_offset;
            out[read..read + count].copy_from_slice(&self.storage[start..start + count]);
            self.read_offset += count;
            read += count;

            if self.read_offset == self.block_size {
                self.read_offset = 0;
                self.read_block = self.next_block(self.read_block);
                self.full_blocks -= 1;
            }
        }

        self.queued -= read;
        self.debug_check();
        read
    }

    /// Bytes the next [`Self::write`] will accept.
    ///
    /// This counts every block that is not full, minus what is already in the
    /// current write block. Always 0 once sealed.
    pub fn get_space(&self) -> usize {
        if self.sealed {
            0
        } else {
            (self.block_count - self.full_blocks) * self.block_size - self.write_offset
        }
    }

    /// Bytes buffered and not yet read, including the uncommitted tail of the
    /// current write block.
    pub fn get_delay(&self) -> usize {
        self.queued
    }

    /// Bytes a [`Self::read`] could return right now.
    pub fn readable(&self) -> usize {
        // With no full block left, the read offset sits inside the tail.
        let tail = if self.sealed { self.write_offset } else { 0 };
        self.full_blocks * self.block_size + tail - self.read_offset
    }

    /// Declares end of stream: refuses further writes and makes the partial
    /// tail block readable.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Discards all buffered data and accepts writes again.
    ///
    /// The arena is kept; only the bookkeeping is cleared.
    pub fn reset(&mut self) {
        self.write_block = 0;
        self.read_block = 0;
        self.write_offset = 0;
        self.read_offset = 0;
        self.full_blocks = 0;
        self.queued = 0;
        self.sealed = false;
    }

    /// Returns `true` once [`Self::seal`] has been called.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Returns `true` when every block holds unread data.
    pub fn is_full(&self) -> bool {
        self.full_blocks == self.block_count
    }

    /// Returns `true` when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// Blocks holding committed, unread data.
    pub fn full_blocks(&self) -> usize {
        self.full_blocks
    }

    /// Bytes per block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks.
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Total bytes the ring can hold.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Byte offset inside the block the consumer is draining.
    pub fn read_offset(&self) -> usize {
        self.read_offset
    }

    /// Byte offset inside the block the producer is filling.
    pub fn write_offset(&self) -> usize {
        self.write_offset
    }

    /// Captures the current bookkeeping.
    pub fn occupancy(&self) -> Occupancy {
        Occupancy {
            block_size: self.block_size,
            block_count: self.block_count,
            full_blocks: self.full_blocks,
            queued_bytes: self.queued,
            space: self.get_space(),
            write_block: self.write_block,
            read_block: self.read_block,
            write_offset: self.write_offset,
            read_offset: self.read_offset,
            sealed: self.sealed,
        }
    }

    fn block_start(&self, block: usize) -> usize {
        block * self.block_size
    }

    fn next_block(&self, block: usize) -> usize {
        (block + 1) % self.block_count
    }

    fn debug_check(&self) {
        debug_assert!(self.full_blocks <= self.block_count);
        debug_assert!(self.write_offset < self.block_size);
        debug_assert!(self.read_offset < self.block_size);
        debug_assert_eq!(
            self.write_block,
            (self.read_block + self.full_blocks) % self.block_count
        );
        debug_assert_eq!(
            self.queued,
            self.full_blocks * self.block_size + self.write_offset - self.read_offset
        );
    }
}

impl fmt::Debug for BlockRingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRingBuffer")
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count)
            .field("write_block", &self.write_block)
            .field("read_block", &self.read_block)
            .field("write_offset", &self.write_offset)
            .field("read_offset", &self.read_offset)
            .field("full_blocks", &self.full_blocks)
            .field("queued", &self.queued)
            .field("sealed", &self.sealed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Checks the delay/space reconciliation that must hold after every call.
    fn assert_reconciled(ring: &BlockRingBuffer) {
        assert!(ring.full_blocks() <= ring.block_count());
        assert_eq!(
            ring.get_delay() + ring.get_space(),
            ring.capacity() - ring.read_offset(),
            "{ring:?}"
        );
    }

    #[test]
    fn rejects_zero_geometry() {
        assert!(matches!(
            BlockRingBuffer::new(0, 4),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            BlockRingBuffer::new(4, 0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn empty_read_changes_nothing() {
        let mut ring = BlockRingBuffer::new(8, 3).unwrap();
        let before = ring.occupancy();
        let mut out = [0u8; 16];
        assert_eq!(ring.read(&mut out), 0);
        assert_eq!(ring.occupancy(), before);
        assert_eq!(out, [0u8; 16]);
    }

    #[test]
    fn partial_block_is_queued_but_not_readable() {
        let mut ring = BlockRingBuffer::new(4, 2).unwrap();
        assert_eq!(ring.write(b"ab"), 2);
        assert_eq!(ring.get_delay(), 2);
        assert_eq!(ring.readable(), 0);
        assert_eq!(ring.full_blocks(), 0);
        assert_eq!(ring.get_space(), 6);

        let mut out = [0u8; 4];
        assert_eq!(ring.read(&mut out), 0);
        assert_reconciled(&ring);
    }

    #[test]
    fn backpressure_caps_at_capacity() {
        let mut ring = BlockRingBuffer::new(16, 4).unwrap();
        let data = vec![7u8; ring.capacity() + 13];
        assert_eq!(ring.write(&data), 64);
        assert!(ring.is_full());
        assert_eq!(ring.get_space(), 0);
        assert_eq!(ring.write(b"x"), 0);
        assert_reconciled(&ring);
    }

    #[test]
    fn space_returns_in_whole_blocks() {
        let mut ring = BlockRingBuffer::new(4, 2).unwrap();
        ring.write(b"ABCDEFGH");
        let mut out = [0u8; 1];
        for expected_space in [0, 0, 0, 4] {
            ring.read(&mut out);
            assert_eq!(ring.get_space(), expected_space);
            assert_reconciled(&ring);
        }
    }

    #[test]
    fn seal_exposes_tail_and_blocks_writes() {
        let mut ring = BlockRingBuffer::new(4, 3).unwrap();
        assert_eq!(ring.write(b"hello world"), 11);
        ring.seal();
        assert_eq!(ring.write(b"!"), 0);
        assert_eq!(ring.get_space(), 0);
        assert_eq!(ring.readable(), 11);

        let mut out = [0u8; 5];
        assert_eq!(ring.read(&mut out), 5);
        assert_eq!(&out, b"hello");
        let mut rest = [0u8; 16];
        assert_eq!(ring.read(&mut rest), 6);
        assert_eq!(&rest[..6], b" world");
        assert!(ring.is_empty());
        assert_eq!(ring.read(&mut rest), 0);
    }

    #[test]
    fn tail_can_be_read_piecewise_after_seal() {
        let mut ring = BlockRingBuffer::new(8, 2).unwrap();
        ring.write(b"abc");
        ring.seal();
        let mut out = [0u8; 1];
        let mut collected = Vec::new();
        while ring.read(&mut out) == 1 {
            collected.push(out[0]);
            assert_eq!(ring.get_delay(), 3 - collected.len());
            assert_eq!(ring.readable(), 3 - collected.len());
        }
        assert_eq!(collected, b"abc");
        assert_eq!(ring.readable(), 0);
    }

    #[test]
    fn readable_tracks_full_blocks_then_tail_after_seal() {
        let mut ring = BlockRingBuffer::new(4, 3).unwrap();
        assert_eq!(ring.write(b"ABCDEFGHxy"), 10);
        assert_eq!(ring.readable(), 8);
        ring.seal();

        let mut out = [0u8; 1];
        let mut collected = Vec::new();
        for remaining in (0..10).rev() {
            assert_eq!(ring.read(&mut out), 1);
            collected.push(out[0]);
            assert_eq!(ring.readable(), remaining);
            assert_eq!(ring.get_delay(), remaining);
        }
        assert_eq!(ring.read(&mut out), 0);
        assert_eq!(collected, b"ABCDEFGHxy");
    }

    #[test]
    fn reset_clears_bookkeeping() {
        let mut ring = BlockRingBuffer::new(4, 2).unwrap();
        ring.write(b"ABCDEF");
        ring.seal();
        ring.reset();
        assert!(ring.is_empty());
        assert!(!ring.is_sealed());
        assert_eq!(ring.get_space(), 8);
        assert_eq!(ring.write(b"xyzw"), 4);
        let mut out = [0u8; 4];
        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(&out, b"xyzw");
    }

    #[test]
    fn random_walk_keeps_invariants_and_order() {
        // Deterministic xorshift so the walk is reproducible.
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        let mut ring = BlockRingBuffer::new(5, 3).unwrap();
        let mut produced: u8 = 0;
        let mut expected = std::collections::VecDeque::new();
        let mut consumed: Vec<u8> = Vec::new();

        for _ in 0..2_000 {
            if next() % 2 == 0 {
                let len = (next() % 9) as usize;
                let chunk: Vec<u8> = (0..len)
                    .map(|_| {
                        produced = produced.wrapping_add(1);
                        produced
                    })
                    .collect();
                let space = ring.get_space();
                let taken = ring.write(&chunk);
                assert_eq!(taken, len.min(space));
                expected.extend(&chunk[..taken]);
                // Untaken bytes are dropped by this producer; rewind the counter.
                produced = produced.wrapping_sub((len - taken) as u8);
            } else {
                let mut out = vec![0u8; (next() % 9) as usize];
                let readable = ring.readable();
                let got = ring.read(&mut out);
                assert_eq!(got, out.len().min(readable));
                consumed.extend(&out[..got]);
            }
            assert_reconciled(&ring);
        }

        let expected_prefix: Vec<u8> = expected.drain(..consumed.len()).collect();
        assert_eq!(consumed, expected_prefix);
        assert_eq!(expected.len(), ring.get_delay());
    }
}
