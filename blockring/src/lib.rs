// SPDX-FileCopyrightText: 2025 Contributors to the blockring project.
// SPDX-License-Identifier: Apache-2.0

//! # blockring - fixed-block ring buffer and poll-driven byte cache
//!
//! A bounded staging area that decouples a bursty byte producer (a file, pipe
//! or socket being read) from a bursty byte consumer (a player writing its
//! output), with backpressure expressed as short counts instead of errors.
//!
//! ## Overview
//!
//! ### Key Concepts
//!
//! - **Block**: one fixed-size chunk of the ring's storage
//! - **Full block**: a block entirely holding committed, unread data
//! - **Backpressure**: a write returning fewer bytes than offered because the
//!   ring is full
//! - **Seal**: the producer's end-of-stream declaration, making the partially
//!   written tail block readable
//! - **Drain**: writing out what is left after the input has ended
//!
//! ## Architecture
//!
//! ```text
//!             ┌─────────────────────────── PollLoop ───────────────────────────┐
//!  input fd ──┼─► read ──► BlockRingBuffer [blk0|blk1|...|blkN] ──► write ─────┼──► output fd
//!             │            (get_space sizes reads, short counts pause input)   │
//!             └──────────── Poller (poll(2)) ── BufferObserver (events) ───────┘
//! ```
//!
//! - [`BlockRingBuffer`] owns one arena of `block_size * block_count` bytes
//! - [`SharedBlockRing`] puts it behind a mutex for producer/consumer threads
//! - [`PollLoop`] drives it between two descriptors with a [`Poller`]
//! - [`BufferObserver`] receives structured events from the loop
//!
//! ## Examples
//!
//! ### Direct use of the ring
//!
//! ```
//! use blockring::BlockRingBuffer;
//!
//! # fn main() -> Result<(), blockring::Error> {
//! let mut ring = BlockRingBuffer::new(4, 2)?;
//! assert_eq!(ring.write(b"ABCDEFGH"), 8);
//! assert_eq!(ring.write(b"Z"), 0); // full
//!
//! let mut out = [0u8; 4];
//! assert_eq!(ring.read(&mut out), 4);
//! assert_eq!(ring.write(b"Z"), 1); // one block freed
//! # Ok(())
//! # }
//! ```
//!
//! ### Caching a stream between two descriptors
//!
//! ```no_run
//! use blockring::{PollLoop, StatsObserver, TracingObserver, config::CacheConfig};
//!
//! # fn main() -> Result<(), blockring::Error> {
//! let config = CacheConfig::from_file("cache.json")?;
//! let stats = StatsObserver::new();
//! let mut cache = PollLoop::new(std::io::stdin(), std::io::stdout(), &config)?
//!     .with_observer((TracingObserver, stats.clone()));
//! let report = cache.run()?;
//! eprintln!("{:?} {:?}", report, stats.snapshot());
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - [`BlockRingBuffer`] and [`PollLoop`] are single-owner; the loop never
//!   spawns threads and only ever blocks inside the poll call
//! - [`SharedBlockRing`] is `Send + Sync` and cheaply cloneable

mod error;
mod observer;
mod pump;
mod ring;

pub mod config;

pub use error::{Endpoint, Error, Result};
pub use observer::{
    BufferEvent, BufferObserver, NullObserver, StatsObserver, TracingObserver, TransferStats,
};
pub use pump::{
    CancelToken, LoopState, RunReport,
    driver::PollLoop,
    poller::{Interest, Poller, Registration, SystemPoller, set_nonblocking},
};
pub use ring::{Occupancy, buffer::BlockRingBuffer, shared::SharedBlockRing};
