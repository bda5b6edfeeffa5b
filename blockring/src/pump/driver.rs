// SPDX-FileCopyrightText: 2025 Contributors to the blockring project.
// SPDX-License-Identifier: Apache-2.0

//! The poll loop: moves bytes from an input descriptor into a ring and from
//! the ring to an output descriptor, one readiness wait per iteration.

use std::{
    io::{self, Read, Write},
    os::fd::AsRawFd,
    time::Duration,
};

use tracing::{debug, error, warn};

use super::{
    CancelToken, LoopState, RunReport,
    poller::{Interest, Poller, Registration, SystemPoller},
};
use crate::{
    BlockRingBuffer, Endpoint, Error, Result,
    config::CacheConfig,
    observer::{BufferEvent, BufferObserver, NullObserver},
};

/// Bytes held outside the ring between two descriptor calls.
///
/// Inbound: read from the input but not yet accepted by the ring.
/// Outbound: taken from the ring but not yet accepted by the output.
struct Staging {
    data: Vec<u8>,
    start: usize,
    end: usize,
}

impl Staging {
    fn new(size: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| Error::OutOfMemory { bytes: size })?;
        data.resize(size, 0u8);
        Ok(Self {
            data,
            start: 0,
            end: 0,
        })
    }

    fn pending(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn fill(&mut self, len: usize) {
        self.start = 0;
        self.end = len;
    }

    fn consume(&mut self, count: usize) {
        self.start += count;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }
}

/// Single-threaded driver pumping an input through a [`BlockRingBuffer`]
/// into an output.
///
/// Each iteration waits once on the [`Poller`], bounded by the configured
/// timeout, then:
///
/// - reads from the input if it is ready and the ring is not full, sizing the
///   read by [`BlockRingBuffer::get_space`];
/// - writes to the output if it is ready and there is something to write,
///   keeping the unwritten tail of a partial write for the next iteration.
///
/// A zero-byte input read seals the ring and moves the loop from
/// [`LoopState::Streaming`] to [`LoopState::Draining`]; once the ring and the
/// staged tail are empty the output is flushed and the loop is
/// [`LoopState::Done`].
///
/// The poll call is meant to be the only place the loop waits. A blocking
/// output whose free space is smaller than the chunk size can still stall
/// inside `write`, so pass a non-blocking sink (see [`crate::set_nonblocking`])
/// when that matters; its `WouldBlock` results are retried on the next
/// iteration without counting against the retry budget. The descriptors are
/// left in the mode the caller chose, since it is shared with every other
/// holder of the open file.
///
/// The loop owns the input, the output and the ring. They are released when
/// the loop is dropped, whatever state it ended in, or handed back by
/// [`Self::into_parts`].
///
/// # Examples
///
/// ```no_run
/// use blockring::{PollLoop, config::CacheConfig};
///
/// # fn main() -> Result<(), blockring::Error> {
/// let input = std::fs::File::open("/tmp/stream.ts").unwrap();
/// let output = std::io::stdout();
/// let mut cache = PollLoop::new(input, output, &CacheConfig::default())?;
/// let report = cache.run()?;
/// eprintln!("copied {} byte(s)", report.bytes_out);
/// # Ok(())
/// # }
/// ```
pub struct PollLoop<I, O, P = SystemPoller> {
    input: I,
    output: O,
    poller: P,
    ring: BlockRingBuffer,
    observer: Box<dyn BufferObserver>,
    cancel: CancelToken,
    poll_timeout: Duration,
    max_io_retries: u32,
    state: LoopState,
    input_open: bool,
    can_read: bool,
    inbound: Staging,
    outbound: Staging,
    input_failures: u32,
    output_failures: u32,
    bytes_in: u64,
    bytes_out: u64,
    iterations: u64,
}

impl<I, O> PollLoop<I, O, SystemPoller>
where
    I: Read + AsRawFd,
    O: Write + AsRawFd,
{
    /// Creates a loop that waits with `poll(2)`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or the ring cannot be allocated.
    pub fn new(input: I, output: O, config: &CacheConfig) -> Result<Self> {
        Self::with_poller(input, output, SystemPoller::new(), config)
    }
}

impl<I, O, P> PollLoop<I, O, P>
where
    I: Read + AsRawFd,
    O: Write + AsRawFd,
    P: Poller,
{
    /// Creates a loop that waits with a caller-supplied [`Poller`].
    pub fn with_poller(input: I, output: O, poller: P, config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let ring = BlockRingBuffer::from_config(&config.ring)?;
        let chunk_size = config.chunk_size();

        Ok(Self {
            input,
            output,
            poller,
            ring,
            observer: Box::new(NullObserver),
            cancel: CancelToken::new(),
            poll_timeout: config.poll_timeout(),
            max_io_retries: config.max_io_retries,
            state: LoopState::Streaming,
            input_open: true,
            can_read: true,
            inbound: Staging::new(chunk_size)?,
            outbound: Staging::new(chunk_size)?,
            input_failures: 0,
            output_failures: 0,
            bytes_in: 0,
            bytes_out: 0,
            iterations: 0,
        })
    }

    /// Replaces the event sink.
    pub fn with_observer<B: BufferObserver + 'static>(mut self, observer: B) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Replaces the cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a clone of the token that stops [`Self::run`].
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Current phase.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// The ring between input and output.
    pub fn buffer(&self) -> &BlockRingBuffer {
        &self.ring
    }

    /// Whether the input is currently being polled.
    pub fn can_read(&self) -> bool {
        self.input_open && self.can_read && self.inbound.is_empty()
    }

    /// Consumes the loop and hands back its resources.
    pub fn into_parts(self) -> (I, O, BlockRingBuffer) {
        (self.input, self.output, self.ring)
    }

    /// Runs iterations until [`LoopState::Done`] or cancellation.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] once an endpoint fails more than the configured number
    ///   of consecutive times
    /// - [`Error::Poll`] if the readiness primitive fails
    pub fn run(&mut self) -> Result<RunReport> {
        debug!(
            block_size = self.ring.block_size(),
            block_count = self.ring.block_count(),
            "poll loop starting"
        );

        let mut cancelled = false;
        while self.state != LoopState::Done {
            if self.cancel.is_cancelled() {
                debug!(state = %self.state, queued = self.ring.get_delay(), "poll loop cancelled");
                cancelled = true;
                break;
            }
            self.step()?;
        }

        let report = self.report(cancelled);
        debug!(
            bytes_in = report.bytes_in,
            bytes_out = report.bytes_out,
            iterations = report.iterations,
            "poll loop finished"
        );
        Ok(report)
    }

    /// Runs a single iteration: one readiness wait and the transfers it allows.
    pub fn step(&mut self) -> Result<LoopState> {
        if self.state == LoopState::Done {
            return Ok(self.state);
        }
        self.iterations += 1;

        // Bytes carried over from a short ring write go first.
        self.flush_inbound();

        let want_input = self.can_read();
        let want_output = !self.outbound.is_empty() || self.ring.readable() > 0;

        if want_input || want_output {
            let mut registrations = [Registration::new(-1, Interest::NONE); 2];
            let mut count = 0;
            let input_slot = want_input.then(|| {
                registrations[count] = Registration::new(self.input.as_raw_fd(), Interest::READABLE);
                count += 1;
                count - 1
            });
            let output_slot = want_output.then(|| {
                registrations[count] =
                    Registration::new(self.output.as_raw_fd(), Interest::WRITABLE);
                count += 1;
                count - 1
            });

            self.poller
                .poll(&mut registrations[..count], self.poll_timeout)
                .map_err(Error::Poll)?;

            // Hang-ups and errors are surfaced by the read or write itself.
            if let Some(slot) = input_slot
                && !registrations[slot].ready.is_empty()
            {
                self.pump_input()?;
            }
            if let Some(slot) = output_slot
                && !registrations[slot].ready.is_empty()
            {
                self.pump_output()?;
            }
        }

        self.settle()?;
        Ok(self.state)
    }

    fn pump_input(&mut self) -> Result<()> {
        let space = self.ring.get_space();
        if space == 0 {
            self.pause_input();
            return Ok(());
        }

        let want = space.min(self.inbound.data.len());
        match self.input.read(&mut self.inbound.data[..want]) {
            Ok(0) => {
                self.input_open = false;
                self.ring.seal();
                self.transition(LoopState::Draining);
            }
            Ok(count) => {
                self.input_failures = 0;
                self.inbound.fill(count);
                self.flush_inbound();
            }
            Err(error) => self.handle_io_error(Endpoint::Input, want, error)?,
        }
        Ok(())
    }

    fn flush_inbound(&mut self) {
        if self.inbound.is_empty() {
            return;
        }

        let full_before = self.ring.full_blocks();
        let accepted = self.ring.write(self.inbound.pending());
        self.inbound.consume(accepted);

        if accepted > 0 {
            self.bytes_in += accepted as u64;
            self.observer.on_event(&BufferEvent::InputRead {
                bytes: accepted,
                occupancy: self.ring.occupancy(),
            });
        }
        let filled = self.ring.full_blocks() - full_before;
        if filled > 0 {
            self.observer.on_event(&BufferEvent::BlockFilled {
                blocks: filled,
                occupancy: self.ring.occupancy(),
            });
        }
        if self.ring.is_full() {
            self.pause_input();
        }
    }

    fn pump_output(&mut self) -> Result<()> {
        if self.outbound.is_empty() {
            let full_before = self.ring.full_blocks();
            let count = self.ring.read(&mut self.outbound.data);
            self.outbound.fill(count);

            let drained = full_before - self.ring.full_blocks();
            if drained > 0 {
                self.observer.on_event(&BufferEvent::BlockDrained {
                    blocks: drained,
                    occupancy: self.ring.occupancy(),
                });
                self.can_read = true;
            }
        }
        if self.outbound.is_empty() {
            return Ok(());
        }

        let attempted = self.outbound.pending().len();
        match self.output.write(self.outbound.pending()) {
            Ok(0) => self.handle_io_error(
                Endpoint::Output,
                attempted,
                io::Error::from(io::ErrorKind::WriteZero),
            )?,
            Ok(count) => {
                self.output_failures = 0;
                self.outbound.consume(count);
                self.bytes_out += count as u64;
                self.observer.on_event(&BufferEvent::OutputWritten {
                    bytes: count,
                    attempted,
                    occupancy: self.ring.occupancy(),
                });
            }
            Err(error) => self.handle_io_error(Endpoint::Output, attempted, error)?,
        }
        Ok(())
    }

    fn pause_input(&mut self) {
        if self.can_read {
            self.can_read = false;
            self.observer.on_event(&BufferEvent::BufferFull {
                occupancy: self.ring.occupancy(),
            });
        }
    }

    fn handle_io_error(
        &mut self,
        endpoint: Endpoint,
        attempted: usize,
        error: io::Error,
    ) -> Result<()> {
        let transient = Error::is_transient_io(&error);
        self.observer.on_event(&BufferEvent::IoError {
            endpoint,
            attempted,
            transient,
            error: &error,
        });
        if transient {
            debug!(%endpoint, attempted, "transient I/O error, retrying: {}", error);
            return Ok(());
        }

        let failures = match endpoint {
            Endpoint::Input => &mut self.input_failures,
            Endpoint::Output => &mut self.output_failures,
        };
        *failures += 1;
        if *failures > self.max_io_retries {
            error!(
                %endpoint,
                attempted,
                failures = *failures,
                "giving up on {}: {}",
                endpoint,
                error
            );
            return Err(Error::io(endpoint, attempted, error));
        }
        warn!(
            %endpoint,
            attempted,
            failures = *failures,
            "I/O error on {}, retrying: {}",
            endpoint,
            error
        );
        Ok(())
    }

    /// Applies the state transitions implied by the current bookkeeping.
    fn settle(&mut self) -> Result<()> {
        if self.state == LoopState::Draining
            && self.ring.is_empty()
            && self.outbound.is_empty()
            && self.inbound.is_empty()
        {
            if let Err(error) = self.output.flush() {
                return Err(Error::io(Endpoint::Output, 0, error));
            }
            self.transition(LoopState::Done);
        }
        Ok(())
    }

    fn transition(&mut self, to: LoopState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        self.observer
            .on_event(&BufferEvent::StateChanged { from, to });
    }

    fn report(&self, cancelled: bool) -> RunReport {
        RunReport {
            state: self.state,
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
            iterations: self.iterations,
            cancelled,
            occupancy: self.ring.occupancy(),
        }
    }
}
