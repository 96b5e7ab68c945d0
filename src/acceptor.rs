//! Module with [`Acceptor`].
//!
//! The acceptor listens on a [`ServerSocket`] and runs two threads:
//!
//!  * the accept thread, which accepts connections and starts a
//!    [`ConnectionWorker`] for each, and
//!  * the maintenance thread, which cleans up workers once their connection
//!    ended.
//!
//! Both threads, and all workers, are stopped by [`Acceptor::shutdown`],
//! which can be called from any thread (e.g. when receiving a process
//! [signal]).
//!
//! [signal]: crate::signal

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, sleep};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, trace, warn};

use crate::error::{Domain, Error, ErrorOr};
use crate::handler::{Discard, NewHandler};
use crate::lifecycle::{Lifecycle, State};
use crate::net::{IpSocketAddress, ServerSocket};
use crate::worker::ConnectionWorker;

mod options;

pub use options::Options;

/// Time to wait before accepting again after a transient error, e.g. running
/// out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Notices send to the maintenance thread.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Notice {
    /// The read loop of the worker with this id ended.
    Finished(usize),
    /// The acceptor is shutting down.
    Stop,
}

/// Accepts connections, running a [`ConnectionWorker`] for each.
///
/// Dropping the acceptor shuts it down.
///
/// # Examples
///
/// ```
/// use std::io::Write;
/// use std::net::TcpStream;
///
/// use anvil::acceptor::{Acceptor, Options};
/// use anvil::handler::Echo;
/// use anvil::net::IpSocketAddress;
///
/// let options = Options::default()
///     .with_address(IpSocketAddress::from_ipv4_address("127.0.0.1", 0));
/// let acceptor = Acceptor::start(options, Echo::default())?;
/// assert!(acceptor.is_running());
///
/// let port = acceptor.local_address().port();
/// let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
/// stream.write_all(b"Hello world").unwrap();
///
/// acceptor.shutdown();
/// assert!(!acceptor.is_running());
/// # Ok::<(), anvil::Error>(())
/// ```
#[derive(Debug)]
pub struct Acceptor {
    shared: Arc<Shared>,
    threads: Mutex<Threads>,
}

/// Data shared between the acceptor and its threads.
#[derive(Debug)]
struct Shared {
    server: ServerSocket,
    lifecycle: Lifecycle,
    /// All started workers, including those whose connection ended but that
    /// haven't been cleaned up yet.
    workers: Mutex<Vec<ConnectionWorker>>,
    /// Sending side of the maintenance thread's notices.
    notice: Sender<Notice>,
    options: Options,
}

/// Handles of the acceptor's threads, `None` once joined.
#[derive(Debug, Default)]
struct Threads {
    accept: Option<thread::JoinHandle<()>>,
    maintenance: Option<thread::JoinHandle<()>>,
}

impl Acceptor {
    /// Start an acceptor listening on `address`:`port`, discarding all bytes
    /// received on accepted connections.
    ///
    /// See [`Acceptor::start`] to use a different [`Handler`] or options.
    ///
    /// [`Handler`]: crate::Handler
    pub fn create(port: u16, address: &str) -> ErrorOr<Acceptor> {
        let address = IpSocketAddress::from_ipv4_address(address, port);
        Acceptor::start(Options::default().with_address(address), Discard)
    }

    /// Start an acceptor using `options`, creating a handler for every
    /// accepted connection using `new_handler`.
    pub fn start<N>(options: Options, new_handler: N) -> ErrorOr<Acceptor>
    where
        N: NewHandler,
    {
        let server = ServerSocket::listen(options.address())?;
        info!("listening: local_address={}", server.local_address());

        let (sender, receiver) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            server,
            lifecycle: Lifecycle::new(),
            workers: Mutex::new(Vec::new()),
            notice: sender,
            options,
        });
        let _ = shared.lifecycle.start();
        // If starting a thread fails dropping the acceptor cleans up the
        // threads started so far.
        let acceptor = Acceptor {
            shared,
            threads: Mutex::new(Threads::default()),
        };

        let s = acceptor.shared.clone();
        let accept = spawn("anvil_acceptor", move || accept_loop(s, new_handler))?;
        acceptor.threads().accept = Some(accept);

        let s = acceptor.shared.clone();
        let maintenance = spawn("anvil_maintenance", move || maintenance_loop(s, receiver))?;
        acceptor.threads().maintenance = Some(maintenance);

        Ok(acceptor)
    }

    /// Returns `true` while the acceptor is accepting connections.
    ///
    /// This returns `false` once the acceptor is shut down, or if accepting
    /// connections failed with an unrecoverable error.
    pub fn is_running(&self) -> bool {
        self.shared.lifecycle.is_running()
    }

    /// Returns the lifecycle state.
    ///
    /// If accepting connections failed with an unrecoverable error the state
    /// is [`State::Stopping`], [`Acceptor::shutdown`] must still be called to
    /// stop the remaining threads and workers.
    pub fn state(&self) -> State {
        self.shared.lifecycle.state()
    }

    /// Returns the address the acceptor is listening on.
    pub fn local_address(&self) -> &IpSocketAddress {
        self.shared.server.local_address()
    }

    /// Returns the number of workers, including those whose connection ended
    /// but that haven't been cleaned up yet.
    pub fn worker_count(&self) -> usize {
        self.shared.workers().len()
    }

    /// Shut down the acceptor.
    ///
    /// Stops accepting connections, stops both threads and shuts down all
    /// workers. Once this returns none of the acceptor's threads are running,
    /// including those of the workers. This can be called from any thread and
    /// any number of times. Only the first call runs the shutdown, all other
    /// calls wait for it to complete.
    pub fn shutdown(&self) {
        if !self.shared.lifecycle.begin_stop() {
            self.shared.lifecycle.wait_stopped();
            return;
        }

        info!("shutting down acceptor: local_address={}", self.local_address());
        // Fails if the maintenance thread is already gone.
        let _ = self.shared.notice.send(Notice::Stop);
        if let Err(err) = self.shared.server.close() {
            warn!("closing listening socket failed: error={}", err);
        }

        let (accept, maintenance) = {
            let mut threads = self.threads();
            (threads.accept.take(), threads.maintenance.take())
        };
        join("accept", accept);
        join("maintenance", maintenance);

        let workers = std::mem::take(&mut *self.shared.workers());
        debug!("shutting down connection workers: count={}", workers.len());
        for worker in &workers {
            worker.shutdown();
        }
        drop(workers);

        self.shared.lifecycle.finish_stop();
        info!("acceptor stopped");
    }

    fn threads(&self) -> MutexGuard<'_, Threads> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn workers(&self) -> MutexGuard<'_, Vec<ConnectionWorker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn spawn<F>(name: &str, f: F) -> ErrorOr<thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(f)
        .map_err(|err| Error::from_io(&err, "pthread_create()", Domain::Core))
}

fn join(name: &str, handle: Option<thread::JoinHandle<()>>) {
    if let Some(handle) = handle {
        if let Err(panic) = handle.join() {
            let msg = crate::panic_message(&*panic);
            error!("{} thread panicked: message={}", name, msg);
        }
    }
}

/// Run the accept thread.
fn accept_loop<N>(shared: Arc<Shared>, new_handler: N)
where
    N: NewHandler,
{
    debug!("accept thread started");
    let options = shared.options.worker_options();
    let mut next_id = 0;
    while !shared.lifecycle.is_stopping() {
        let socket = match shared.server.accept(shared.options.accept_timeout()) {
            Ok(socket) => socket,
            // No connection yet.
            Err(ref err) if err.is_timeout() => continue,
            Err(err) => {
                if shared.lifecycle.is_stopping() {
                    trace!("accept interrupted by shutdown: error={}", err);
                    break;
                } else if is_transient(&err) {
                    warn!("accepting connection failed, retrying: error={}", err);
                    sleep(ACCEPT_BACKOFF);
                    continue;
                }
                error!("accepting connections failed: error={}", err);
                let _ = shared.lifecycle.fail();
                if let Err(err) = shared.server.close() {
                    warn!("closing listening socket failed: error={}", err);
                }
                break;
            }
        };

        next_id += 1;
        let id = next_id;
        debug!(
            "accepted connection: id={}, remote_address={}",
            id,
            socket.remote_address()
        );
        let handler = new_handler.new_handler(socket.remote_address());
        let notice = Some(shared.notice.clone());
        match ConnectionWorker::start_with_notice(id, socket, handler, options, notice) {
            Ok(worker) => shared.workers().push(worker),
            Err(err) => warn!("starting connection worker failed: id={}, error={}", id, err),
        }
    }
    debug!("accept thread stopped");
}

/// Returns `true` if accepting can be retried after `err`.
fn is_transient(err: &Error) -> bool {
    matches!(
        err.os_code(),
        Some(libc::ECONNABORTED)
            | Some(libc::EINTR)
            | Some(libc::EMFILE)
            | Some(libc::ENFILE)
            | Some(libc::ENOBUFS)
            | Some(libc::ENOMEM)
            | Some(libc::EPROTO)
            | Some(libc::EPERM)
    )
}

/// Run the maintenance thread.
fn maintenance_loop(shared: Arc<Shared>, notices: Receiver<Notice>) {
    debug!("maintenance thread started");
    loop {
        match notices.recv_timeout(shared.options.sweep_interval()) {
            Ok(Notice::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Notice::Finished(id)) => trace!("connection worker finished: id={}", id),
            Err(RecvTimeoutError::Timeout) => {}
        }
        reap(&shared);
    }
    debug!("maintenance thread stopped");
}

/// Remove all workers whose connection ended and shut them down.
fn reap(shared: &Shared) {
    let finished: Vec<ConnectionWorker> = {
        let mut workers = shared.workers();
        let (finished, running) = workers.drain(..).partition(|worker| !worker.is_running());
        *workers = running;
        finished
    };
    if !finished.is_empty() {
        debug!("cleaning up connection workers: count={}", finished.len());
    }
    // Outside the lock, this waits for the threads to stop.
    for worker in &finished {
        worker.shutdown();
    }
}
