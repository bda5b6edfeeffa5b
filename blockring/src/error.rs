// SPDX-FileCopyrightText: 2025 Contributors to the blockring project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for ring buffer and poll loop operations.
//!
//! Capacity conditions (buffer full, buffer empty) are never errors: they are
//! reported through the short counts returned by
//! [`crate::BlockRingBuffer::write`] and [`crate::BlockRingBuffer::read`].
//! The variants below cover what actually broke.

use std::fmt;

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = core::result::Result<T, Error>;

/// Which side of a [`crate::PollLoop`] an I/O failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// The byte source feeding the ring.
    Input,
    /// The byte sink the ring drains into.
    Output,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Input => f.write_str("input"),
            Endpoint::Output => f.write_str("output"),
        }
    }
}

/// Errors that can occur when building or driving a ring.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A construction or configuration parameter was out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The block arena could not be reserved.
    #[error("Out of memory allocating {bytes} byte(s) of ring storage")]
    OutOfMemory {
        /// Size of the failed reservation.
        bytes: usize,
    },

    /// A descriptor kept failing after the configured number of retries.
    #[error("I/O error on {endpoint} after attempting {attempted} byte(s): {source}")]
    Io {
        /// Side of the loop that failed.
        endpoint: Endpoint,
        /// Size of the transfer that was attempted when the failure was given up on.
        attempted: usize,
        /// The last error reported by the descriptor.
        #[source]
        source: std::io::Error,
    },

    /// The readiness primitive itself failed.
    #[error("Poll failed: {0}")]
    Poll(#[source] std::io::Error),

    /// A blocking operation on a shared ring timed out before completing.
    #[error("Timeout")]
    Timeout,

    /// The ring was sealed, no more data can be written.
    #[error("Ring closed")]
    Closed,

    /// A configuration document could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A generic error for failures outside the ring itself.
    ///
    /// Used by applications embedding the ring (thread joins, signal handler
    /// setup, data verification).
    #[error("Other error: {0}")]
    Other(String),

    /// Failed to parse a JSON configuration document.
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Builds an [`Error::Io`] for the given side of the loop.
    pub(crate) fn io(endpoint: Endpoint, attempted: usize, source: std::io::Error) -> Self {
        Error::Io {
            endpoint,
            attempted,
            source,
        }
    }

    /// Returns `true` for I/O failures that are expected to clear up on their own.
    ///
    /// `EINTR` and `EAGAIN` style conditions are retried on the next poll
    /// iteration without counting against the retry budget.
    pub fn is_transient_io(error: &std::io::Error) -> bool {
        matches!(
            error.kind(),
            std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
        )
    }
}
