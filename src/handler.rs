//! Connection handlers.
//!
//! A [`Handler`] is given all bytes read from a single connection by its
//! [`ConnectionWorker`]. A new handler is created for every accepted
//! connection by a [`NewHandler`] implementation, which is shared between all
//! connections of an [`Acceptor`].
//!
//! Two handlers are provided: [`Discard`] which drops all bytes it's given and
//! [`Echo`] which writes them back to the peer.
//!
//! [`ConnectionWorker`]: crate::ConnectionWorker
//! [`Acceptor`]: crate::Acceptor
//!
//! # Examples
//!
//! Using a closure as [`NewHandler`].
//!
//! ```
//! use anvil::handler::{Handler, NewHandler};
//! use anvil::net::{ClientSocket, IpSocketAddress};
//! use anvil::ErrorOr;
//!
//! struct Count(usize);
//!
//! impl Handler for Count {
//!     fn on_data(&mut self, _: &ClientSocket, data: &[u8]) -> ErrorOr<()> {
//!         self.0 += data.len();
//!         Ok(())
//!     }
//! }
//!
//! fn new_handler() -> impl NewHandler<Handler = Count> {
//!     |_: &IpSocketAddress| Count(0)
//! }
//! # drop(new_handler());
//! ```

use std::time::Duration;

use log::trace;

use crate::error::ErrorOr;
use crate::net::{ClientSocket, IpSocketAddress};

/// Handles the bytes read from a single connection.
pub trait Handler: Send + 'static {
    /// Called with the bytes read from the connection. The bytes are only
    /// valid for the duration of the call.
    ///
    /// Returning an error closes the connection.
    fn on_data(&mut self, socket: &ClientSocket, data: &[u8]) -> ErrorOr<()>;

    /// Called once the connection is closed, by either side.
    fn on_close(&mut self) {}
}

/// Creates a [`Handler`] for every new connection.
///
/// This is implemented for all functions and closures with the signature
/// `Fn(&IpSocketAddress) -> impl Handler`.
pub trait NewHandler: Send + Sync + 'static {
    /// Type of handler created.
    type Handler: Handler;

    /// Create a new handler for the connection with `remote_address`.
    fn new_handler(&self, remote_address: &IpSocketAddress) -> Self::Handler;
}

impl<F, H> NewHandler for F
where
    F: Fn(&IpSocketAddress) -> H + Send + Sync + 'static,
    H: Handler,
{
    type Handler = H;

    fn new_handler(&self, remote_address: &IpSocketAddress) -> H {
        (self)(remote_address)
    }
}

/// Handler that drops all bytes.
#[derive(Copy, Clone, Debug, Default)]
pub struct Discard;

impl Handler for Discard {
    fn on_data(&mut self, socket: &ClientSocket, data: &[u8]) -> ErrorOr<()> {
        trace!(
            "discarding bytes: remote_address={}, length={}",
            socket.remote_address(),
            data.len()
        );
        Ok(())
    }
}

impl NewHandler for Discard {
    type Handler = Discard;

    fn new_handler(&self, _: &IpSocketAddress) -> Discard {
        Discard
    }
}

/// Handler that writes all bytes back to the peer.
#[derive(Copy, Clone, Debug)]
pub struct Echo {
    timeout: Duration,
}

impl Echo {
    /// Create a new `Echo` handler, taking at most `timeout` to write back
    /// the bytes of a single read.
    pub const fn new(timeout: Duration) -> Echo {
        Echo { timeout }
    }
}

impl Default for Echo {
    fn default() -> Echo {
        Echo::new(Duration::from_secs(1))
    }
}

impl Handler for Echo {
    fn on_data(&mut self, socket: &ClientSocket, data: &[u8]) -> ErrorOr<()> {
        socket.write_all(data, self.timeout)
    }
}

impl NewHandler for Echo {
    type Handler = Echo;

    fn new_handler(&self, _: &IpSocketAddress) -> Echo {
        *self
    }
}
