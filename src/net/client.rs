//! Module with [`ClientSocket`] and related types.

use std::io;
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use log::trace;
use socket2::SockRef;

use crate::error::{Domain, Error, ErrorOr, ErrorOrExt};
use crate::net::{IpSocketAddress, Readiness, Socket};

/// Flags passed to `send(2)`, we don't want a `SIGPIPE` when writing to a
/// connection the peer closed.
#[cfg(any(
    target_os = "android",
    target_os = "freebsd",
    target_os = "linux",
    target_os = "netbsd",
    target_os = "openbsd",
))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(
    target_os = "android",
    target_os = "freebsd",
    target_os = "linux",
    target_os = "netbsd",
    target_os = "openbsd",
)))]
const SEND_FLAGS: libc::c_int = 0;

/// Result of [`ClientSocket::read`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Recv {
    /// Number of bytes read into the buffer.
    Data(usize),
    /// No data arrived within the timeout.
    Timeout,
    /// The peer closed its side of the connection.
    Closed,
}

impl Recv {
    /// Returns the number of bytes read, `0` if no bytes were read.
    pub const fn len(self) -> usize {
        match self {
            Recv::Data(n) => n,
            Recv::Timeout | Recv::Closed => 0,
        }
    }

    /// Returns `true` if no bytes were read.
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the peer closed the connection.
    pub const fn is_closed(self) -> bool {
        matches!(self, Recv::Closed)
    }
}

/// A connected, non-blocking TCP socket.
///
/// A `ClientSocket` is either returned by [`ServerSocket::accept`] or created
/// by connecting to a listener with [`ClientSocket::connect`]. All I/O is done
/// with a timeout, none of the methods block indefinitely.
///
/// [`ServerSocket::accept`]: crate::net::ServerSocket::accept
#[derive(Debug)]
pub struct ClientSocket {
    socket: Socket,
    local_address: IpSocketAddress,
    remote_address: IpSocketAddress,
}

impl ClientSocket {
    /// Create a new `ClientSocket` from a connected `socket`.
    ///
    /// # Panics
    ///
    /// This panics if `socket` isn't in non-blocking mode.
    pub(crate) fn new(
        socket: Socket,
        local_address: IpSocketAddress,
        remote_address: IpSocketAddress,
    ) -> ClientSocket {
        assert!(
            socket.is_nonblocking().must(),
            "ClientSocket requires a non-blocking socket"
        );
        ClientSocket {
            socket,
            local_address,
            remote_address,
        }
    }

    /// Connect to `address`, waiting at most `timeout` for the connection to
    /// be established.
    ///
    /// Returns a [timeout] error if the connection wasn't established in time.
    ///
    /// [timeout]: crate::error::Kind::Timeout
    pub fn connect(address: &IpSocketAddress, timeout: Duration) -> ErrorOr<ClientSocket> {
        let remote = address.to_socket_addr()?;
        let socket = Socket::create()?;
        socket.set_nonblocking(true).must();

        {
            let fd = socket.borrow_fd("connect()")?;
            match SockRef::from(&fd).connect(&remote.into()) {
                Ok(()) => {}
                Err(ref err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {}
                Err(err) => return Err(Error::from_io(&err, "connect()", Domain::Network)),
            }
        }

        let _ = socket.poll(Readiness::WRITABLE, timeout)?;
        let local_address = {
            let fd = socket.borrow_fd("getsockopt()")?;
            let sock = SockRef::from(&fd);
            match sock.take_error() {
                Ok(None) => {}
                Ok(Some(err)) => return Err(Error::from_io(&err, "connect()", Domain::Network)),
                Err(err) => return Err(Error::from_io(&err, "getsockopt()", Domain::Network)),
            }
            let local = sock
                .local_addr()
                .map_err(|err| Error::from_io(&err, "getsockname()", Domain::Network))?;
            IpSocketAddress::from_sock_addr(&local, "getsockname()")?
        };
        let remote_address = IpSocketAddress::from_socket_addr(remote);
        trace!(
            "connected socket: local_address={}, remote_address={}",
            local_address,
            remote_address
        );
        Ok(ClientSocket::new(socket, local_address, remote_address))
    }

    /// Read bytes into `buf`, waiting at most `timeout` for them to arrive.
    ///
    /// Returns [`Recv::Data`] with the number of bytes read,
    /// [`Recv::Timeout`] if nothing arrived in time or [`Recv::Closed`] once
    /// the peer closed its side of the connection.
    pub fn read(&self, buf: &mut [u8], timeout: Duration) -> ErrorOr<Recv> {
        if !self.socket.can_read_without_blocking(timeout)? {
            return Ok(Recv::Timeout);
        }

        let fd = self.socket.borrow_fd("recv()")?;
        loop {
            match syscall!(recv(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len(), 0)) {
                Ok(0) if !buf.is_empty() => return Ok(Recv::Closed),
                Ok(n) => return Ok(Recv::Data(n as usize)),
                // Readiness doesn't guarantee there is something to read.
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Recv::Timeout)
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::from_io(&err, "recv()", Domain::Network)),
            }
        }
    }

    /// Write bytes from `buf`, waiting at most `timeout` for the socket to
    /// become writable.
    ///
    /// Returns the number of bytes written, which is `0` if the socket didn't
    /// become writable in time.
    pub fn write(&self, buf: &[u8], timeout: Duration) -> ErrorOr<usize> {
        if !self.socket.can_write_without_blocking(timeout)? {
            return Ok(0);
        }

        let fd = self.socket.borrow_fd("send()")?;
        loop {
            match syscall!(send(fd.as_raw_fd(), buf.as_ptr().cast(), buf.len(), SEND_FLAGS)) {
                Ok(n) => return Ok(n as usize),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::from_io(&err, "send()", Domain::Network)),
            }
        }
    }

    /// Write all bytes in `buf`, taking at most `timeout` in total.
    ///
    /// Returns a [timeout] error if not all bytes could be written in time.
    ///
    /// [timeout]: crate::error::Kind::Timeout
    pub fn write_all(&self, mut buf: &[u8], timeout: Duration) -> ErrorOr<()> {
        let deadline = Instant::now() + timeout;
        while !buf.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.write(buf, remaining)? {
                0 if remaining == Duration::from_secs(0) => {
                    return Err(Error::from_timeout("send()", Domain::Network))
                }
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }

    /// Shut down the writing side of the connection, the peer will read the
    /// end of the stream. Reading is still possible.
    pub fn shutdown_write(&self) -> ErrorOr<()> {
        let fd = self.socket.borrow_fd("shutdown()")?;
        syscall!(shutdown(fd.as_raw_fd(), libc::SHUT_WR))
            .map(|_| ())
            .map_err(|err| Error::from_io(&err, "shutdown()", Domain::Network))
    }

    /// Close the connection, see [`Socket::close`].
    pub fn close(&self) -> ErrorOr<()> {
        self.socket.close()
    }

    /// Returns the local address of the connection.
    pub fn local_address(&self) -> &IpSocketAddress {
        &self.local_address
    }

    /// Returns the address of the peer.
    pub fn remote_address(&self) -> &IpSocketAddress {
        &self.remote_address
    }

    /// Returns the underlying socket.
    pub fn socket(&self) -> &Socket {
        &self.socket
    }
}
