// SPDX-FileCopyrightText: 2025 Contributors to the blockring project.
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration for rings and poll loops.
//!
//! Both structs deserialize from JSON with every field optional, so a
//! configuration file only needs to mention what it changes:
//!
//! ```
//! use blockring::config::CacheConfig;
//!
//! # fn main() -> Result<(), blockring::Error> {
//! let config = CacheConfig::from_json_str(r#"{ "ring": { "block_count": 8 } }"#)?;
//! assert_eq!(config.ring.block_count, 8);
//! assert_eq!(config.ring.block_size, blockring::config::DEFAULT_BLOCK_SIZE);
//! # Ok(())
//! # }
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default number of bytes per block.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default number of blocks in a ring (1 MiB total with the default block size).
pub const DEFAULT_BLOCK_COUNT: usize = 256;

/// Default upper bound on a single readiness wait.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;

/// Default number of consecutive non-transient I/O failures tolerated per endpoint.
pub const DEFAULT_MAX_IO_RETRIES: u32 = 3;

/// Geometry of a [`crate::BlockRingBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RingConfig {
    /// Bytes per block.
    pub block_size: usize,
    /// Number of blocks.
    pub block_count: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            block_count: DEFAULT_BLOCK_COUNT,
        }
    }
}

impl RingConfig {
    /// Creates a ring geometry from explicit values.
    pub fn new(block_size: usize, block_count: usize) -> Self {
        Self {
            block_size,
            block_count,
        }
    }

    /// Total number of bytes the ring can hold.
    ///
    /// Returns `None` if the product overflows.
    pub fn capacity(&self) -> Option<usize> {
        self.block_size.checked_mul(self.block_count)
    }

    /// Checks that the geometry describes a ring that can exist.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::InvalidArgument(
                "block_size must be greater than zero".to_string(),
            ));
        }
        if self.block_count == 0 {
            return Err(Error::InvalidArgument(
                "block_count must be greater than zero".to_string(),
            ));
        }
        if self.capacity().is_none() {
            return Err(Error::InvalidArgument(format!(
                "ring of {} block(s) of {} byte(s) overflows usize",
                self.block_count, self.block_size
            )));
        }
        Ok(())
    }
}

/// Settings for a [`crate::PollLoop`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Geometry of the ring between input and output.
    pub ring: RingConfig,
    /// Upper bound on one readiness wait, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Largest transfer attempted per readiness event. `0` means one block.
    pub chunk_size: usize,
    /// Consecutive non-transient failures tolerated on one endpoint before the
    /// run is aborted. `0` aborts on the first failure.
    pub max_io_retries: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ring: RingConfig::default(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            chunk_size: 0,
            max_io_retries: DEFAULT_MAX_IO_RETRIES,
        }
    }
}

impl CacheConfig {
    /// Parses a JSON document and validates the result.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|error| {
            Error::Config(format!(
                "Error while reading configuration from \"{}\": {}",
                path.display(),
                error
            ))
        })?;
        Self::from_json_str(json.as_str())
    }

    /// Checks every field for values the poll loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.ring.validate()?;
        if self.poll_timeout_ms == 0 {
            return Err(Error::InvalidArgument(
                "poll_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if i32::try_from(self.poll_timeout_ms).is_err() {
            return Err(Error::InvalidArgument(format!(
                "poll_timeout_ms {} does not fit a poll(2) timeout",
                self.poll_timeout_ms
            )));
        }
        if let Some(capacity) = self.ring.capacity()
            && self.chunk_size > capacity
        {
            return Err(Error::InvalidArgument(format!(
                "chunk_size {} exceeds the ring capacity of {} byte(s)",
                self.chunk_size, capacity
            )));
        }
        Ok(())
    }

    /// The readiness wait bound as a [`Duration`].
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Effective transfer size per readiness event.
    pub fn chunk_size(&self) -> usize {
        if self.chunk_size == 0 {
            self.ring.block_size
        } else {
            self.chunk_size
        }
    }
}
