//! Process signal handling.
//!
//! Process signals are received on a dedicated thread, started by
//! [`SignalListener::spawn`], which calls a callback for each received
//! signal. The callback is free to block, e.g. to call
//! [`Acceptor::shutdown`].
//!
//! [`Acceptor::shutdown`]: crate::Acceptor::shutdown
//!
//! # Notes
//!
//! The [`SignalListener`] must be created on the main thread *before* any
//! other thread is spawned, on Linux the signals are only blocked for threads
//! spawned after it was created. Any thread spawned before it may still
//! receive the process signal, running the default action (e.g. terminating
//! the process).
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use anvil::signal::{Signal, SignalListener};
//! use anvil::Acceptor;
//!
//! // NOTE: must be created before starting the acceptor's threads.
//! let listener = SignalListener::new(&[Signal::Interrupt, Signal::Terminate])?;
//! let acceptor = Arc::new(Acceptor::create(8080, "0.0.0.0")?);
//! let acceptor2 = acceptor.clone();
//! let handle = listener.spawn(move |_| acceptor2.shutdown())?;
//! # drop(handle);
//! # Ok::<(), anvil::Error>(())
//! ```

use std::{fmt, thread};

use log::{error, info, trace, warn};
use mio::{Events, Interest, Poll, Token, Waker};
use mio_signals::{SignalSet, Signals};

use crate::error::{Domain, Error, ErrorOr, Kind};

/// Token used to receive process signals.
const SIGNAL: Token = Token(0);
/// Token used to stop the signal thread.
const WAKER: Token = Token(1);

/// Process signal.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Signal {
    /// Interrupt signal.
    ///
    /// This signal is received by the process when its controlling terminal
    /// wishes to interrupt the process. This signal will for example be send
    /// when Ctrl+C is pressed in most terminals.
    ///
    /// Corresponds to POSIX signal `SIGINT`.
    Interrupt,
    /// Termination request signal.
    ///
    /// This signal received when the process is requested to terminate. This
    /// allows the process to perform nice termination, releasing resources and
    /// saving state if appropriate. This signal will be send when using the
    /// `kill` command for example.
    ///
    /// Corresponds to POSIX signal `SIGTERM`.
    Terminate,
    /// Terminal quit signal.
    ///
    /// This signal is received when the process is requested to quit and
    /// perform a core dump.
    ///
    /// Corresponds to POSIX signal `SIGQUIT`.
    Quit,
}

impl Signal {
    /// All signals.
    pub const ALL: [Signal; 3] = [Signal::Interrupt, Signal::Terminate, Signal::Quit];

    /// Convert a [`mio_signals::Signal`] into our own `Signal`.
    fn from_mio(signal: mio_signals::Signal) -> Signal {
        match signal {
            mio_signals::Signal::Interrupt => Signal::Interrupt,
            mio_signals::Signal::Terminate => Signal::Terminate,
            mio_signals::Signal::Quit => Signal::Quit,
        }
    }

    const fn into_mio(self) -> mio_signals::Signal {
        match self {
            Signal::Interrupt => mio_signals::Signal::Interrupt,
            Signal::Terminate => mio_signals::Signal::Terminate,
            Signal::Quit => mio_signals::Signal::Quit,
        }
    }

    /// Returns the signal number.
    pub const fn as_signo(self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
            Signal::Quit => libc::SIGQUIT,
        }
    }

    /// Returns a human readable name for the signal.
    const fn as_str(self) -> &'static str {
        match self {
            Signal::Interrupt => "interrupt",
            Signal::Terminate => "terminate",
            Signal::Quit => "quit",
        }
    }

    /// Returns the name of the Posix constant of the signal.
    const fn as_posix(self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Quit => "SIGQUIT",
        }
    }
}

/// Use the alternate flag (`{:#}`) to include the POSIX name, e.g.
/// `interrupt (SIGINT)`.
impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())?;
        if f.alternate() {
            f.write_str(" (")?;
            f.write_str(self.as_posix())?;
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// Receives process signals, see the [module documentation].
///
/// [module documentation]: crate::signal
pub struct SignalListener {
    poll: Poll,
    signals: Signals,
}

impl SignalListener {
    /// Start listening for `signals`.
    ///
    /// The signals will no longer run their default action, e.g. terminating
    /// the process, for the calling thread and all threads spawned after.
    pub fn new(signals: &[Signal]) -> ErrorOr<SignalListener> {
        let set = signals
            .iter()
            .map(|signal| SignalSet::from(signal.into_mio()))
            .fold(None, |set: Option<SignalSet>, signal| match set {
                Some(set) => Some(set | signal),
                None => Some(signal),
            })
            .ok_or_else(|| {
                Error::from_string("no signals to listen for", Domain::Core, Kind::Generic)
            })?;

        let poll = Poll::new().map_err(|err| Error::from_io(&err, "poll_create()", Domain::Core))?;
        trace!("setting up signal handling: signals={:?}", set);
        let mut signals =
            Signals::new(set).map_err(|err| Error::from_io(&err, "signalfd()", Domain::Core))?;
        poll.registry()
            .register(&mut signals, SIGNAL, Interest::READABLE)
            .map_err(|err| Error::from_io(&err, "poll_register()", Domain::Core))?;
        Ok(SignalListener { poll, signals })
    }

    /// Start a thread that calls `callback` for every received signal.
    ///
    /// The thread stops once the returned [`SignalHandle`] is dropped.
    pub fn spawn<F>(self, callback: F) -> ErrorOr<SignalHandle>
    where
        F: FnMut(Signal) + Send + 'static,
    {
        let waker = Waker::new(self.poll.registry(), WAKER)
            .map_err(|err| Error::from_io(&err, "poll_register()", Domain::Core))?;
        let handle = thread::Builder::new()
            .name("anvil_signals".to_owned())
            .spawn(move || self.run(callback))
            .map_err(|err| Error::from_io(&err, "pthread_create()", Domain::Core))?;
        Ok(SignalHandle {
            waker,
            handle: Some(handle),
        })
    }

    /// Run the signal thread.
    fn run<F>(mut self, mut callback: F)
    where
        F: FnMut(Signal),
    {
        trace!("signal thread started");
        let mut events = Events::with_capacity(4);
        loop {
            if let Err(err) = self.poll.poll(&mut events, None) {
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                error!("polling for process signals failed: error={}", err);
                return;
            }

            for event in events.iter() {
                match event.token() {
                    SIGNAL => self.relay_signals(&mut callback),
                    WAKER => {
                        trace!("signal thread stopping");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }

    /// Call `callback` for all pending signals.
    fn relay_signals<F>(&mut self, callback: &mut F)
    where
        F: FnMut(Signal),
    {
        loop {
            match self.signals.receive() {
                Ok(Some(signal)) => {
                    let signal = Signal::from_mio(signal);
                    info!("received process signal: signal={:#}", signal);
                    callback(signal);
                }
                Ok(None) => break,
                Err(err) => {
                    error!("receiving process signal failed: error={}", err);
                    break;
                }
            }
        }
    }
}

impl fmt::Debug for SignalListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalListener").finish()
    }
}

/// Handle to the signal thread, see [`SignalListener::spawn`].
///
/// Dropping the handle stops the thread.
pub struct SignalHandle {
    waker: Waker,
    handle: Option<thread::JoinHandle<()>>,
}

impl SignalHandle {
    /// Stop the signal thread and wait for it to stop.
    pub fn stop(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = self.waker.wake() {
                warn!("waking signal thread failed: error={}", err);
                // Can't join a thread that won't stop.
                return;
            }
            if let Err(panic) = handle.join() {
                let msg = crate::panic_message(&*panic);
                error!("signal thread panicked: message={}", msg);
            }
        }
    }
}

impl fmt::Debug for SignalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalHandle")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl Drop for SignalHandle {
    fn drop(&mut self) {
        self.stop_thread();
    }
}
