//! Network related types.
//!
//! All sockets are IPv4 stream (TCP) sockets in non-blocking mode. Blocking is
//! only done by waiting for readiness with a timeout, see [`Socket::poll`], so
//! no call into this module blocks indefinitely.
//!
//! This module provides the following types:
//!  * [`Socket`] owns the file descriptor and can be closed from any thread,
//!  * [`ServerSocket`] listens for and accepts connections,
//!  * [`ClientSocket`] a connected socket, either accepted or connected using
//!    [`ClientSocket::connect`],
//!  * [`IpSocketAddress`] the address of a socket.

mod address;
mod client;
mod server;
mod socket;

pub use address::{IpSocketAddress, IpVersion};
pub use client::{ClientSocket, Recv};
pub use server::{ServerSocket, BACKLOG};
pub use socket::{Readiness, Socket};
