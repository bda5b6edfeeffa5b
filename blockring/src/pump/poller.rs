// SPDX-FileCopyrightText: 2025 Contributors to the blockring project.
// SPDX-License-Identifier: Apache-2.0

//! Readiness polling over raw descriptors.

use std::{
    fmt, io,
    ops::{BitOr, BitOrAssign},
    os::fd::RawFd,
    time::Duration,
};

/// Set of readiness conditions.
///
/// Used both for what a caller is interested in and for what a descriptor
/// turned out to be ready for.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    /// No condition.
    pub const NONE: Interest = Interest(0);
    /// Data can be read without blocking, or the peer hung up.
    pub const READABLE: Interest = Interest(1);
    /// Data can be written without blocking.
    pub const WRITABLE: Interest = Interest(1 << 1);
    /// The descriptor is in an error state.
    pub const ERROR: Interest = Interest(1 << 2);
    /// The peer closed its end. Only ever reported, never requested.
    pub const HANGUP: Interest = Interest(1 << 3);

    /// Returns `true` if every condition in `other` is set.
    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if any condition in `other` is set.
    pub fn intersects(self, other: Interest) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns `true` if no condition is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Interest::READABLE, "READABLE"),
            (Interest::WRITABLE, "WRITABLE"),
            (Interest::ERROR, "ERROR"),
            (Interest::HANGUP, "HANGUP"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("NONE")?;
        }
        Ok(())
    }
}

/// One descriptor handed to a [`Poller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Descriptor to watch.
    pub fd: RawFd,
    /// Conditions the caller waits for.
    pub interest: Interest,
    /// Conditions reported by the last poll. `ERROR` and `HANGUP` may be set
    /// even if not requested.
    pub ready: Interest,
}

impl Registration {
    /// Creates a registration with nothing reported yet.
    pub fn new(fd: RawFd, interest: Interest) -> Self {
        Self {
            fd,
            interest,
            ready: Interest::NONE,
        }
    }
}

/// A readiness primitive: waits until any registered descriptor is ready or
/// the timeout elapses.
pub trait Poller {
    /// Fills in [`Registration::ready`] for every entry and returns how many
    /// entries have a non-empty readiness set.
    ///
    /// An interrupted wait returns `Ok(0)` with every `ready` cleared.
    fn poll(&mut self, registrations: &mut [Registration], timeout: Duration) -> io::Result<usize>;
}

/// [`Poller`] backed by `poll(2)`.
#[derive(Debug, Default)]
pub struct SystemPoller {
    fds: Vec<libc::pollfd>,
}

impl SystemPoller {
    /// Creates a poller.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Poller for SystemPoller {
    fn poll(&mut self, registrations: &mut [Registration], timeout: Duration) -> io::Result<usize> {
        self.fds.clear();
        self.fds.extend(registrations.iter().map(|registration| {
            let mut events = 0;
            if registration.interest.contains(Interest::READABLE) {
                events |= libc::POLLIN;
            }
            if registration.interest.contains(Interest::WRITABLE) {
                events |= libc::POLLOUT;
            }
            libc::pollfd {
                fd: registration.fd,
                events,
                revents: 0,
            }
        }));

        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let result = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        for registration in registrations.iter_mut() {
            registration.ready = Interest::NONE;
        }
        if result < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(error);
        }

        for (registration, pollfd) in registrations.iter_mut().zip(self.fds.iter()) {
            let revents = pollfd.revents;
            if revents & libc::POLLIN != 0 {
                registration.ready |= Interest::READABLE;
            }
            if revents & libc::POLLOUT != 0 {
                registration.ready |= Interest::WRITABLE;
            }
            if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                registration.ready |= Interest::ERROR;
            }
            if revents & libc::POLLHUP != 0 {
                registration.ready |= Interest::HANGUP;
            }
        }
        Ok(result as usize)
    }
}

/// Puts a descriptor into non-blocking mode.
///
/// With a non-blocking output, writes larger than the sink can take return a
/// short count instead of stalling the loop.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{io::Write, os::fd::AsRawFd, os::unix::net::UnixStream};

    use super::*;

    #[test]
    fn interest_flags_combine() {
        let both = Interest::READABLE | Interest::WRITABLE;
        assert!(both.contains(Interest::READABLE));
        assert!(both.intersects(Interest::WRITABLE | Interest::ERROR));
        assert!(!both.contains(Interest::ERROR));
        assert!(Interest::NONE.is_empty());
        assert_eq!(format!("{both:?}"), "READABLE | WRITABLE");
        assert_eq!(format!("{:?}", Interest::NONE), "NONE");
    }

    #[test]
    fn reports_readable_socket() {
        let (mut left, right) = UnixStream::pair().unwrap();
        let mut poller = SystemPoller::new();
        let mut registrations = [Registration::new(right.as_raw_fd(), Interest::READABLE)];

        let ready = poller
            .poll(&mut registrations, Duration::from_millis(10))
            .unwrap();
        assert_eq!(ready, 0);
        assert!(registrations[0].ready.is_empty());

        left.write_all(b"ping").unwrap();
        let ready = poller
            .poll(&mut registrations, Duration::from_millis(1000))
            .unwrap();
        assert_eq!(ready, 1);
        assert!(registrations[0].ready.contains(Interest::READABLE));
    }

    #[test]
    fn reports_writable_socket_and_hangup() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut poller = SystemPoller::new();
        let mut registrations = [Registration::new(left.as_raw_fd(), Interest::WRITABLE)];
        poller
            .poll(&mut registrations, Duration::from_millis(1000))
            .unwrap();
        assert!(registrations[0].ready.contains(Interest::WRITABLE));

        drop(right);
        let mut registrations = [Registration::new(left.as_raw_fd(), Interest::READABLE)];
        poller
            .poll(&mut registrations, Duration::from_millis(1000))
            .unwrap();
        assert!(
            registrations[0]
                .ready
                .intersects(Interest::READABLE | Interest::HANGUP)
        );
    }

    #[test]
    fn nonblocking_is_idempotent() {
        let (left, _right) = UnixStream::pair().unwrap();
        set_nonblocking(left.as_raw_fd()).unwrap();
        set_nonblocking(left.as_raw_fd()).unwrap();
        let flags = unsafe { libc::fcntl(left.as_raw_fd(), libc::F_GETFL) };
        assert_ne!(flags & libc::O_NONBLOCK, 0);
    }
}
