// SPDX-FileCopyrightText: 2025 Contributors to the blockring project.
// SPDX-License-Identifier: Apache-2.0

//! Poll-driven pumping of bytes from an input descriptor to an output
//! descriptor through a [`crate::BlockRingBuffer`].
//!
//! This module defines:
//! - The driver itself ([`driver`])
//! - The readiness primitive it waits on ([`poller`])
//! - Loop state, cancellation and run reporting types

pub mod driver;
pub mod poller;

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::Serialize;

use crate::Occupancy;

/// Phase of a [`driver::PollLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    /// Input open; reading and writing as capacity allows.
    Streaming,
    /// Input ended; writing out what is left in the ring.
    Draining,
    /// Input ended and everything has been written. Terminal.
    Done,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Streaming => f.write_str("streaming"),
            LoopState::Draining => f.write_str("draining"),
            LoopState::Done => f.write_str("done"),
        }
    }
}

/// Cooperative stop request shared between a loop and whoever may stop it.
///
/// The loop checks the token once per iteration, so a cancelled run stops at
/// most one poll timeout later.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Safe to call from signal-handling threads.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once [`Self::cancel`] has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Summary of a finished [`driver::PollLoop::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// State the loop was in when it returned.
    pub state: LoopState,
    /// Bytes accepted from the input.
    pub bytes_in: u64,
    /// Bytes delivered to the output.
    pub bytes_out: u64,
    /// Poll iterations performed.
    pub iterations: u64,
    /// Whether the run stopped because of a [`CancelToken`].
    pub cancelled: bool,
    /// Ring state at return.
    pub occupancy: Occupancy,
}
