//! Module with [`ServerSocket`].

use std::io;
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::time::Duration;

use log::trace;
use socket2::SockRef;

use crate::error::{Domain, Error, ErrorOr, ErrorOrExt};
use crate::net::{ClientSocket, IpSocketAddress, Readiness, Socket};

/// Maximum number of pending connections on a listening socket.
pub const BACKLOG: libc::c_int = 10;

/// A non-blocking TCP socket listening for connections.
///
/// The socket is closed when the `ServerSocket` is dropped.
#[derive(Debug)]
pub struct ServerSocket {
    socket: Socket,
    local_address: IpSocketAddress,
}

impl ServerSocket {
    /// Create a new listening socket bound to `address`.
    ///
    /// The socket has both the `SO_REUSEADDR` and `SO_REUSEPORT` options set.
    /// Using port `0` binds to a port picked by the OS, use
    /// [`ServerSocket::local_address`] to get it.
    pub fn listen(address: &IpSocketAddress) -> ErrorOr<ServerSocket> {
        let address = address.to_socket_addr()?;
        let socket = Socket::create()?;
        socket.set_nonblocking(true).must();

        let local_address = {
            let fd = socket.borrow_fd("setsockopt()")?;
            let sock = SockRef::from(&fd);
            sock.set_reuse_address(true)
                .map_err(|err| Error::from_io(&err, "setsockopt()", Domain::Network))?;
            sock.set_reuse_port(true)
                .map_err(|err| Error::from_io(&err, "setsockopt()", Domain::Network))?;
            sock.bind(&address.into())
                .map_err(|err| Error::from_io(&err, "bind()", Domain::Network))?;
            sock.listen(BACKLOG)
                .map_err(|err| Error::from_io(&err, "listen()", Domain::Network))?;
            let local = sock
                .local_addr()
                .map_err(|err| Error::from_io(&err, "getsockname()", Domain::Network))?;
            IpSocketAddress::from_sock_addr(&local, "getsockname()")?
        };
        trace!("listening on {}", local_address);
        Ok(ServerSocket {
            socket,
            local_address,
        })
    }

    /// Accept a single connection, waiting at most `timeout` for one to
    /// arrive.
    ///
    /// Returns a [timeout] error if no connection arrived in time, or if it
    /// disappeared before it could be accepted.
    ///
    /// [timeout]: crate::error::Kind::Timeout
    pub fn accept(&self, timeout: Duration) -> ErrorOr<ClientSocket> {
        let _ = self.socket.poll(Readiness::READABLE, timeout)?;

        let (stream, remote) = {
            let fd = self.socket.borrow_fd("accept()")?;
            loop {
                match SockRef::from(&fd).accept() {
                    Ok(ok) => break ok,
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                        return Err(Error::from_timeout("accept()", Domain::Network))
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(Error::from_io(&err, "accept()", Domain::Network)),
                }
            }
        };
        // Safety: `into_raw_fd` gives up ownership of the file descriptor.
        let socket = unsafe { Socket::from_raw_fd(stream.into_raw_fd()) };
        socket.set_nonblocking(true).must();

        let remote_address = IpSocketAddress::from_sock_addr(&remote, "accept()")?;
        let local_address = {
            let fd = socket.borrow_fd("getsockname()")?;
            let local = SockRef::from(&fd)
                .local_addr()
                .map_err(|err| Error::from_io(&err, "getsockname()", Domain::Network))?;
            IpSocketAddress::from_sock_addr(&local, "getsockname()")?
        };
        trace!(
            "accepted connection: local_address={}, remote_address={}",
            local_address,
            remote_address
        );
        Ok(ClientSocket::new(socket, local_address, remote_address))
    }

    /// Close the socket, see [`Socket::close`].
    ///
    /// A call to [`ServerSocket::accept`] blocked in another thread returns
    /// an error.
    pub fn close(&self) -> ErrorOr<()> {
        self.socket.close()
    }

    /// Returns the address the socket is bound to.
    pub fn local_address(&self) -> &IpSocketAddress {
        &self.local_address
    }

    /// Returns the underlying socket.
    pub fn socket(&self) -> &Socket {
        &self.socket
    }
}
