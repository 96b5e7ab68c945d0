//! Options for starting an [`Acceptor`].
//!
//! [`Acceptor`]: crate::Acceptor

use std::time::Duration;

use crate::net::IpSocketAddress;
use crate::worker::WorkerOptions;

/// Options for starting an [`Acceptor`].
///
/// [`Acceptor`]: crate::Acceptor
///
/// # Examples
///
/// Using the default options, listening on `0.0.0.0:8080`.
///
/// ```
/// use anvil::acceptor::Options;
///
/// let opts = Options::default();
/// assert_eq!(opts.address().to_string(), "0.0.0.0:8080");
/// ```
///
/// Listening on a port picked by the OS, with shorter timeouts.
///
/// ```
/// use std::time::Duration;
///
/// use anvil::acceptor::Options;
/// use anvil::net::IpSocketAddress;
///
/// let opts = Options::default()
///     .with_address(IpSocketAddress::from_ipv4_address("127.0.0.1", 0))
///     .with_accept_timeout(Duration::from_millis(100))
///     .with_read_timeout(Duration::from_millis(100));
/// # drop(opts); // Silence unused variable warning.
/// ```
#[derive(Clone, Debug)]
pub struct Options {
    address: IpSocketAddress,
    accept_timeout: Duration,
    sweep_interval: Duration,
    worker: WorkerOptions,
}

impl Options {
    /// Default port, 8080.
    pub const DEFAULT_PORT: u16 = 8080;
    /// Default accept timeout, 1 second.
    pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_millis(1000);
    /// Default interval in which finished workers are cleaned up, 1 second.
    pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

    /// Returns the address to listen on.
    pub const fn address(&self) -> &IpSocketAddress {
        &self.address
    }

    /// Set the address to listen on.
    pub fn with_address(mut self, address: IpSocketAddress) -> Self {
        self.address = address;
        self
    }

    /// Returns the accept timeout.
    pub const fn accept_timeout(&self) -> Duration {
        self.accept_timeout
    }

    /// Maximum time to wait for a single connection. This also bounds the
    /// time the accept loop takes to notice a shutdown.
    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /// Returns the sweep interval.
    pub const fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Maximum time between two clean ups of finished workers. Workers are
    /// also cleaned up as soon as they finish.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Returns the read timeout of the workers.
    pub const fn read_timeout(&self) -> Duration {
        self.worker.read_timeout()
    }

    /// Set the read timeout of the workers, see
    /// [`WorkerOptions::with_read_timeout`].
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.worker = self.worker.with_read_timeout(timeout);
        self
    }

    /// Returns the read buffer size of the workers.
    pub const fn buffer_size(&self) -> usize {
        self.worker.buffer_size()
    }

    /// Set the read buffer size of the workers, see
    /// [`WorkerOptions::with_buffer_size`].
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.worker = self.worker.with_buffer_size(size);
        self
    }

    /// Returns the options used for every worker.
    pub const fn worker_options(&self) -> WorkerOptions {
        self.worker
    }
}

impl Default for Options {
    fn default() -> Options {
        Options {
            address: IpSocketAddress::from_ipv4_address("0.0.0.0", Options::DEFAULT_PORT),
            accept_timeout: Options::DEFAULT_ACCEPT_TIMEOUT,
            sweep_interval: Options::DEFAULT_SWEEP_INTERVAL,
            worker: WorkerOptions::default(),
        }
    }
}
