//! Module with [`Socket`] and related types.

use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use std::time::{Duration, Instant};
use std::{fmt, io, ops};

use log::{debug, trace, warn};

use crate::error::{Domain, Error, ErrorOr};

/// File descriptor value used when the socket doesn't own an endpoint.
const INVALID_FD: RawFd = -1;

/// A non-blocking IPv4 stream socket.
///
/// The `Socket` is the exclusive owner of its file descriptor, it can't be
/// cloned. All methods take `&self` so that another thread can [`close`] the
/// socket while a call is blocked on it, causing that call to return early.
/// The file descriptor is only released once no other call is using it, so
/// its number can never be reused by another endpoint underneath an in-flight
/// call. Any call made after the socket is closed fails with `EBADF`.
///
/// [`close`]: Socket::close
pub struct Socket {
    fd: AtomicI32,
    /// Held (shared) for the duration of every system call using `fd`, held
    /// exclusively while releasing it.
    in_use: RwLock<()>,
}

impl Socket {
    /// Create a new IPv4 stream socket.
    pub fn create() -> ErrorOr<Socket> {
        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )
        .map_err(|err| Error::from_io(&err, "socket()", Domain::Network))?;
        // Safety: `into_raw_fd` gives up ownership of the file descriptor.
        Ok(unsafe { Socket::from_raw_fd(socket.into_raw_fd()) })
    }

    /// Returns the file descriptor, or `-1` if the socket is closed.
    pub fn fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire)
    }

    /// Returns `true` if the socket is closed.
    pub fn is_closed(&self) -> bool {
        self.fd() == INVALID_FD
    }

    /// Returns `true` if the socket is in non-blocking mode.
    pub fn is_nonblocking(&self) -> ErrorOr<bool> {
        let fd = self.borrow_fd("fcntl()")?;
        syscall!(fcntl(fd.as_raw_fd(), libc::F_GETFL))
            .map(|flags| flags & libc::O_NONBLOCK != 0)
            .map_err(|err| Error::from_io(&err, "fcntl()", Domain::Network))
    }

    /// Enable or disable non-blocking mode, leaving the other file status
    /// flags untouched.
    pub fn set_nonblocking(&self, nonblocking: bool) -> ErrorOr<()> {
        let fd = self.borrow_fd("fcntl()")?;
        let flags = syscall!(fcntl(fd.as_raw_fd(), libc::F_GETFL))
            .map_err(|err| Error::from_io(&err, "fcntl()", Domain::Network))?;
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        syscall!(fcntl(fd.as_raw_fd(), libc::F_SETFL, flags))
            .map(|_| ())
            .map_err(|err| Error::from_io(&err, "fcntl()", Domain::Network))
    }

    /// Returns `true` if the socket can be read from without blocking, waiting
    /// at most `timeout`.
    ///
    /// Unlike [`Socket::poll`] running out of time is not an error, it returns
    /// `false` instead.
    pub fn can_read_without_blocking(&self, timeout: Duration) -> ErrorOr<bool> {
        self.is_ready(Readiness::READABLE, timeout)
    }

    /// Returns `true` if the socket can be written to without blocking,
    /// waiting at most `timeout`.
    ///
    /// Unlike [`Socket::poll`] running out of time is not an error, it returns
    /// `false` instead.
    pub fn can_write_without_blocking(&self, timeout: Duration) -> ErrorOr<bool> {
        self.is_ready(Readiness::WRITABLE, timeout)
    }

    fn is_ready(&self, events: Readiness, timeout: Duration) -> ErrorOr<bool> {
        match self.poll(events, timeout) {
            Ok(_) => Ok(true),
            Err(ref err) if err.is_timeout() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Wait at most `timeout` for any of `events` to occur.
    ///
    /// Returns the events that occurred, which may include
    /// [hang up](Readiness::is_hup) and [error](Readiness::is_error) events.
    /// Returns a [timeout] error if nothing happened within `timeout`.
    ///
    /// [timeout]: crate::error::Kind::Timeout
    pub fn poll(&self, events: Readiness, timeout: Duration) -> ErrorOr<Readiness> {
        let deadline = Instant::now() + timeout;
        loop {
            let fd = self.borrow_fd("poll()")?;
            let mut poll_fd = libc::pollfd {
                fd: fd.as_raw_fd(),
                events: events.0,
                revents: 0,
            };
            let timeout_ms = as_millis(deadline.saturating_duration_since(Instant::now()));
            match syscall!(poll(&mut poll_fd, 1, timeout_ms)) {
                Ok(0) => return Err(Error::from_timeout("poll()", Domain::Network)),
                Ok(_) => return Ok(Readiness(poll_fd.revents)),
                // Try again with the time we have left.
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::from_io(&err, "poll()", Domain::Network)),
            }
        }
    }

    /// Close the socket.
    ///
    /// This first shuts down both directions of the connection, waking up any
    /// call blocked on the socket in other threads. Failing to do so is logged
    /// but otherwise ignored. Next the file descriptor is released, once no
    /// other call is using it, returning any error doing so.
    ///
    /// Closing an already closed socket does nothing.
    pub fn close(&self) -> ErrorOr<()> {
        let fd = self.fd.swap(INVALID_FD, Ordering::AcqRel);
        if fd == INVALID_FD {
            return Ok(());
        }

        debug!("closing socket: fd={}", fd);
        if let Err(err) = syscall!(shutdown(fd, libc::SHUT_RDWR)) {
            let err = Error::from_io(&err, "shutdown()", Domain::Network);
            if err.os_code() == Some(libc::ENOTCONN) {
                // Never connected, or the peer already reset the connection.
                trace!("shutting down socket failed: fd={}, error={}", fd, err);
            } else {
                warn!("shutting down socket failed: fd={}, error={}", fd, err);
            }
        }

        let _guard = self.in_use.write().unwrap_or_else(PoisonError::into_inner);
        syscall!(close(fd))
            .map(|_| ())
            .map_err(|err| Error::from_io(&err, "close()", Domain::Network))
    }

    /// Borrow the file descriptor for the duration of a system call named
    /// `call`, used in the error if the socket is already closed.
    pub(crate) fn borrow_fd(&self, call: &str) -> ErrorOr<BorrowedFd<'_>> {
        let guard = self.in_use.read().unwrap_or_else(PoisonError::into_inner);
        // NOTE: must be loaded *after* acquiring the guard, see `close`.
        match self.fd() {
            INVALID_FD => Err(Error::from_errno(libc::EBADF, call, Domain::Network)),
            fd => Ok(BorrowedFd { fd, _guard: guard }),
        }
    }
}

/// Takes ownership of an existing file descriptor, e.g. one returned by
/// `accept(2)`.
impl FromRawFd for Socket {
    unsafe fn from_raw_fd(fd: RawFd) -> Socket {
        assert!(fd >= 0, "invalid file descriptor: {}", fd);
        Socket {
            fd: AtomicI32::new(fd),
            in_use: RwLock::new(()),
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket").field("fd", &self.fd()).finish()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("closing socket failed: error={}", err);
        }
    }
}

/// A file descriptor borrowed from a [`Socket`], see [`Socket::borrow_fd`].
pub(crate) struct BorrowedFd<'s> {
    fd: RawFd,
    _guard: RwLockReadGuard<'s, ()>,
}

impl AsRawFd for BorrowedFd<'_> {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

/// Converts `timeout` into milliseconds for use in `poll(2)`, rounding up so
/// we don't wake up before the timeout expired.
fn as_millis(timeout: Duration) -> libc::c_int {
    let millis = timeout.as_millis() + u128::from(timeout.subsec_nanos() % 1_000_000 != 0);
    if millis > libc::c_int::MAX as u128 {
        libc::c_int::MAX
    } else {
        millis as libc::c_int
    }
}

/// Set of readiness events used in [`Socket::poll`].
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Readiness(libc::c_short);

impl Readiness {
    /// Readable readiness, `POLLIN`.
    pub const READABLE: Readiness = Readiness(libc::POLLIN);
    /// Writable readiness, `POLLOUT`.
    pub const WRITABLE: Readiness = Readiness(libc::POLLOUT);

    /// Returns `true` if the socket is readable.
    pub const fn is_readable(self) -> bool {
        self.0 & libc::POLLIN != 0
    }

    /// Returns `true` if the socket is writable.
    pub const fn is_writable(self) -> bool {
        self.0 & libc::POLLOUT != 0
    }

    /// Returns `true` if the connection was hung up, `POLLHUP`.
    pub const fn is_hup(self) -> bool {
        self.0 & libc::POLLHUP != 0
    }

    /// Returns `true` if an error condition occurred on the socket, `POLLERR`
    /// or `POLLNVAL`.
    pub const fn is_error(self) -> bool {
        self.0 & (libc::POLLERR | libc::POLLNVAL) != 0
    }
}

impl ops::BitOr for Readiness {
    type Output = Readiness;

    fn bitor(self, other: Readiness) -> Readiness {
        Readiness(self.0 | other.0)
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.is_readable(), "READABLE"),
            (self.is_writable(), "WRITABLE"),
            (self.is_hup(), "HUP"),
            (self.is_error(), "ERROR"),
        ];
        let mut first = true;
        for (_, name) in flags.iter().filter(|(set, _)| *set) {
            if !first {
                f.write_str(" | ")?;
            }
            f.write_str(name)?;
            first = false;
        }
        if first {
            f.write_str("(empty)")?;
        }
        Ok(())
    }
}
