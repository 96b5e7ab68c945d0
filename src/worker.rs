//! Module with [`ConnectionWorker`].
//!
//! Every connection accepted by an [`Acceptor`] is handled by a
//! `ConnectionWorker` running on its own thread. The worker reads from the
//! connection and passes all bytes to its [`Handler`] until the peer closes
//! the connection, an error occurs or the worker is [shut down].
//!
//! [`Acceptor`]: crate::Acceptor
//! [shut down]: ConnectionWorker::shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{debug, error, trace, warn};

use crate::acceptor::Notice;
use crate::error::{Domain, Error, ErrorOr};
use crate::handler::Handler;
use crate::lifecycle::{Lifecycle, State};
use crate::net::{ClientSocket, IpSocketAddress, Recv};

/// Options for a [`ConnectionWorker`].
///
/// See [`acceptor::Options`] for the options of the worker started by an
/// [`Acceptor`].
///
/// [`acceptor::Options`]: crate::acceptor::Options
/// [`Acceptor`]: crate::Acceptor
#[derive(Copy, Clone, Debug)]
pub struct WorkerOptions {
    read_timeout: Duration,
    buffer_size: usize,
}

impl WorkerOptions {
    /// Default read timeout, 1 second.
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);
    /// Default read buffer size, 1 KB.
    pub const DEFAULT_BUFFER_SIZE: usize = 1024;

    /// Maximum time a single read waits for data. This also bounds the time
    /// it takes the worker to notice it was asked to stop.
    pub const fn with_read_timeout(mut self, timeout: Duration) -> WorkerOptions {
        self.read_timeout = timeout;
        self
    }

    /// Returns the read timeout.
    pub const fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Size of the buffer used to read from the connection.
    ///
    /// # Panics
    ///
    /// This panics if `size` is zero.
    pub fn with_buffer_size(mut self, size: usize) -> WorkerOptions {
        assert!(size > 0, "can't read into an empty buffer");
        self.buffer_size = size;
        self
    }

    /// Returns the read buffer size.
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl Default for WorkerOptions {
    fn default() -> WorkerOptions {
        WorkerOptions {
            read_timeout: WorkerOptions::DEFAULT_READ_TIMEOUT,
            buffer_size: WorkerOptions::DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Handle to a thread handling a single connection.
///
/// Dropping the worker shuts it down.
#[derive(Debug)]
pub struct ConnectionWorker {
    /// Unique id (among all workers of an `Acceptor`).
    id: usize,
    shared: Arc<Shared>,
    /// Id of the worker's thread.
    thread_id: thread::ThreadId,
    /// `None` once the thread was joined.
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Data shared between the handle and the thread.
#[derive(Debug)]
struct Shared {
    socket: ClientSocket,
    lifecycle: Lifecycle,
    /// Checked by the thread between reads.
    stop: AtomicBool,
    /// `false` once the thread's read loop ended.
    running: AtomicBool,
}

impl ConnectionWorker {
    /// Start a new thread handling the connection on `socket` using
    /// `handler`.
    pub fn start<H>(
        id: usize,
        socket: ClientSocket,
        handler: H,
        options: WorkerOptions,
    ) -> ErrorOr<ConnectionWorker>
    where
        H: Handler,
    {
        ConnectionWorker::start_with_notice(id, socket, handler, options, None)
    }

    /// Same as [`ConnectionWorker::start`], but sends
    /// [`Notice::Finished`] on `notice` once the read loop ends.
    pub(crate) fn start_with_notice<H>(
        id: usize,
        socket: ClientSocket,
        handler: H,
        options: WorkerOptions,
        notice: Option<Sender<Notice>>,
    ) -> ErrorOr<ConnectionWorker>
    where
        H: Handler,
    {
        let shared = Arc::new(Shared {
            socket,
            lifecycle: Lifecycle::new(),
            stop: AtomicBool::new(false),
            running: AtomicBool::new(true),
        });
        let _ = shared.lifecycle.start();

        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(format!("anvil_worker{}", id))
            .spawn(move || main(id, thread_shared, handler, options, notice))
            .map_err(|err| {
                shared.running.store(false, Ordering::Release);
                shared.lifecycle.finish_stop();
                Error::from_io(&err, "pthread_create()", Domain::Core)
            })?;

        Ok(ConnectionWorker {
            id,
            shared,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Returns the worker's id.
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Returns the address of the peer.
    pub fn remote_address(&self) -> &IpSocketAddress {
        self.shared.socket.remote_address()
    }

    /// Returns `true` until the thread stopped reading from the connection.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Returns the lifecycle state.
    ///
    /// Note that this is still [`State::Running`] after the connection ended
    /// on its own, until the worker is shut down. Use
    /// [`ConnectionWorker::is_running`] to check if the connection ended.
    pub fn state(&self) -> State {
        self.shared.lifecycle.state()
    }

    /// Shut down the worker.
    ///
    /// Closes the connection, causing a read blocked in the worker's thread
    /// to return, and waits for the thread to stop. This can be called from
    /// any thread and any number of times. Only the first call runs the
    /// shutdown, but every call returns only after it completed. The
    /// exception is a call from the worker's own thread, which returns
    /// without waiting.
    pub fn shutdown(&self) {
        let own_thread = thread::current().id() == self.thread_id;
        if !self.shared.lifecycle.begin_stop() {
            if !own_thread {
                self.shared.lifecycle.wait_stopped();
            }
            return;
        }

        trace!("shutting down connection worker: id={}", self.id);
        self.shared.stop.store(true, Ordering::Release);
        if let Err(err) = self.shared.socket.close() {
            warn!("closing connection failed: id={}, error={}", self.id, err);
        }

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if own_thread {
                warn!("connection worker can't join itself: id={}", self.id);
            } else if let Err(panic) = handle.join() {
                let msg = crate::panic_message(&*panic);
                error!("connection worker panicked: id={}, message={}", self.id, msg);
            }
        }
        self.shared.lifecycle.finish_stop();
        debug!("connection worker stopped: id={}", self.id);
    }
}

impl Drop for ConnectionWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run a connection worker thread.
fn main<H>(
    id: usize,
    shared: Arc<Shared>,
    mut handler: H,
    options: WorkerOptions,
    notice: Option<Sender<Notice>>,
) where
    H: Handler,
{
    let _exit = ExitGuard {
        id,
        shared: &shared,
        notice,
    };
    let socket = &shared.socket;
    debug!(
        "connection worker started: id={}, remote_address={}",
        id,
        socket.remote_address()
    );

    let mut buf = vec![0; options.buffer_size];
    while !shared.stop.load(Ordering::Acquire) {
        match socket.read(&mut buf, options.read_timeout) {
            Ok(Recv::Data(n)) => {
                if let Err(err) = handler.on_data(socket, &buf[..n]) {
                    warn!("connection handler failed: id={}, error={}", id, err);
                    break;
                }
            }
            Ok(Recv::Timeout) => continue,
            Ok(Recv::Closed) => {
                debug!("connection closed by peer: id={}", id);
                break;
            }
            Err(err) => {
                if shared.stop.load(Ordering::Acquire) {
                    trace!("connection closed while reading: id={}, error={}", id, err);
                } else {
                    warn!("reading from connection failed: id={}, error={}", id, err);
                }
                break;
            }
        }
    }

    handler.on_close();
    if let Err(err) = socket.close() {
        warn!("closing connection failed: id={}, error={}", id, err);
    }
}

/// Marks the worker as no longer running and notifies the acceptor, also if
/// the handler panicked.
struct ExitGuard<'a> {
    id: usize,
    shared: &'a Shared,
    notice: Option<Sender<Notice>>,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(notice) = self.notice.take() {
            // Fails if the acceptor is already gone.
            let _ = notice.send(Notice::Finished(self.id));
        }
    }
}
