// SPDX-FileCopyrightText: 2025 Contributors to the blockring project.
// SPDX-License-Identifier: Apache-2.0

//! Thread-safe ring for a producer and a consumer on separate threads.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::{BlockRingBuffer, Error, Occupancy, Result, config::RingConfig};

struct SharedState {
    ring: Mutex<BlockRingBuffer>,
    /// Signalled when a block frees up or the ring is closed.
    space_available: Condvar,
    /// Signalled when new data becomes readable or the ring is closed.
    data_available: Condvar,
}

/// A [`BlockRingBuffer`] shared between threads.
///
/// Every operation takes the same mutex, so block counters and offsets are
/// never observed half-updated. The non-blocking [`Self::write`] and
/// [`Self::read`] behave exactly like their single-threaded counterparts; the
/// blocking variants wait on condition variables up to a timeout.
///
/// Cloning the handle is cheap and yields another reference to the same ring.
///
/// # Examples
///
/// ```
/// use blockring::SharedBlockRing;
/// use std::time::Duration;
///
/// # fn main() -> Result<(), blockring::Error> {
/// let ring = SharedBlockRing::new(4, 4)?;
/// let producer = ring.clone();
/// let handle = std::thread::spawn(move || {
///     producer.write_all(b"0123456789", Duration::from_secs(1))?;
///     producer.close();
///     Ok::<_, blockring::Error>(())
/// });
///
/// let mut received = Vec::new();
/// let mut chunk = [0u8; 3];
/// loop {
///     let count = ring.read_some(&mut chunk, Duration::from_secs(1))?;
///     if count == 0 {
///         break;
///     }
///     received.extend_from_slice(&chunk[..count]);
/// }
/// handle.join().unwrap()?;
/// assert_eq!(received, b"0123456789");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SharedBlockRing {
    state: Arc<SharedState>,
}

impl SharedBlockRing {
    /// Allocates a shared ring of `block_count` blocks of `block_size` bytes.
    pub fn new(block_size: usize, block_count: usize) -> Result<Self> {
        Ok(Self::from_ring(BlockRingBuffer::new(block_size, block_count)?))
    }

    /// Allocates a shared ring with the geometry described by `config`.
    pub fn from_config(config: &RingConfig) -> Result<Self> {
        Ok(Self::from_ring(BlockRingBuffer::from_config(config)?))
    }

    /// Wraps an existing ring.
    pub fn from_ring(ring: BlockRingBuffer) -> Self {
        Self {
            state: Arc::new(SharedState {
                ring: Mutex::new(ring),
                space_available: Condvar::new(),
                data_available: Condvar::new(),
            }),
        }
    }

    /// Non-blocking write; see [`BlockRingBuffer::write`].
    pub fn write(&self, data: &[u8]) -> usize {
        let mut ring = self.lock();
        let readable_before = ring.readable();
        let written = ring.write(data);
        if ring.readable() > readable_before {
            self.state.data_available.notify_all();
        }
        written
    }

    /// Non-blocking read; see [`BlockRingBuffer::read`].
    pub fn read(&self, out: &mut [u8]) -> usize {
        let mut ring = self.lock();
        let space_before = ring.get_space();
        let read = ring.read(out);
        if ring.get_space() > space_before {
            self.state.space_available.notify_all();
        }
        read
    }

    /// Writes all of `data`, waiting for the consumer to free blocks as needed.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if `timeout` elapses before everything is accepted;
    ///   the bytes accepted so far stay in the ring
    /// - [`Error::Closed`] if the ring is sealed
    pub fn write_all(&self, mut data: &[u8], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut ring = self.lock();
        while !data.is_empty() {
            if ring.is_sealed() {
                return Err(Error::Closed);
            }

            let readable_before = ring.readable();
            let written = ring.write(data);
            data = &data[written..];
            if ring.readable() > readable_before {
                self.state.data_available.notify_all();
            }
            if data.is_empty() {
                break;
            }

            if ring.get_space() == 0 {
                ring = self.wait(&self.state.space_available, ring, deadline)?;
            }
        }
        Ok(())
    }

    /// Reads at least one byte, waiting for the producer as needed.
    ///
    /// Returns `Ok(0)` only at end of stream: the ring is sealed and drained.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if nothing becomes readable before `timeout` elapses.
    pub fn read_some(&self, out: &mut [u8], timeout: Duration) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        let deadline = Instant::now() + timeout;
        let mut ring = self.lock();
        loop {
            if ring.readable() > 0 {
                let space_before = ring.get_space();
                let read = ring.read(out);
                if ring.get_space() > space_before {
                    self.state.space_available.notify_all();
                }
                return Ok(read);
            }
            if ring.is_sealed() {
                return Ok(0);
            }
            ring = self.wait(&self.state.data_available, ring, deadline)?;
        }
    }

    /// Seals the ring and wakes every waiter.
    ///
    /// Pending data stays readable; further writes fail with [`Error::Closed`].
    pub fn close(&self) {
        self.lock().seal();
        self.state.data_available.notify_all();
        self.state.space_available.notify_all();
    }

    /// See [`BlockRingBuffer::get_space`].
    pub fn get_space(&self) -> usize {
        self.lock().get_space()
    }

    /// See [`BlockRingBuffer::get_delay`].
    pub fn get_delay(&self) -> usize {
        self.lock().get_delay()
    }

    /// See [`BlockRingBuffer::occupancy`].
    pub fn occupancy(&self) -> Occupancy {
        self.lock().occupancy()
    }

    fn lock(&self) -> MutexGuard<'_, BlockRingBuffer> {
        // Ring bookkeeping is updated without intermediate panics, so a
        // poisoned lock still guards a consistent ring.
        self.state
            .ring
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait<'a>(
        &self,
        condvar: &Condvar,
        guard: MutexGuard<'a, BlockRingBuffer>,
        deadline: Instant,
    ) -> Result<MutexGuard<'a, BlockRingBuffer>> {
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout);
        }
        let (guard, _) = condvar
            .wait_timeout(guard, deadline - now)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard)
    }
}
