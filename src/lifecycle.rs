//! Module with the shared lifecycle state machine.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// Lifecycle state of an [`Acceptor`] or [`ConnectionWorker`].
///
/// The state only moves forward: `Starting`, `Running`, `Stopping` and
/// finally `Stopped`.
///
/// [`Acceptor`]: crate::Acceptor
/// [`ConnectionWorker`]: crate::ConnectionWorker
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u8)]
pub enum State {
    /// Created, but not yet running.
    Starting = 0,
    /// Accepting connections or reading from the connection.
    Running = 1,
    /// Shutdown was requested and is in progress.
    Stopping = 2,
    /// Shutdown completed.
    Stopped = 3,
}

impl State {
    const fn from_u8(state: u8) -> State {
        match state {
            0 => State::Starting,
            1 => State::Running,
            2 => State::Stopping,
            _ => State::Stopped,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Starting => "starting",
            State::Running => "running",
            State::Stopping => "stopping",
            State::Stopped => "stopped",
        })
    }
}

/// Atomic [`State`], shared between the threads of a single component.
pub(crate) struct Lifecycle {
    state: AtomicU8,
    /// Set by the single caller that runs the shutdown sequence.
    stop_claimed: AtomicBool,
    /// `true` once the state is `Stopped`, used to wait for the shutdown
    /// sequence to complete.
    stopped: Mutex<bool>,
    stopped_cond: Condvar,
}

impl Lifecycle {
    pub(crate) fn new() -> Lifecycle {
        Lifecycle {
            state: AtomicU8::new(State::Starting as u8),
            stop_claimed: AtomicBool::new(false),
            stopped: Mutex::new(false),
            stopped_cond: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` if the state is [`State::Running`].
    pub(crate) fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    /// Returns `true` if a stop was requested, i.e. the state is either
    /// `Stopping` or `Stopped`.
    pub(crate) fn is_stopping(&self) -> bool {
        self.state() >= State::Stopping
    }

    /// Move from `Starting` to `Running`, returns `false` if a stop was
    /// requested in the meantime.
    pub(crate) fn start(&self) -> bool {
        self.state
            .compare_exchange(
                State::Starting as u8,
                State::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Claim the shutdown sequence and move to `Stopping`. Returns `true` for
    /// exactly one caller, all other callers must not run the shutdown
    /// sequence, see [`Lifecycle::wait_stopped`].
    pub(crate) fn begin_stop(&self) -> bool {
        if self.stop_claimed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.move_to_stopping();
        true
    }

    /// Move to `Stopping` without claiming the shutdown sequence, used when
    /// the component stopped working on its own (e.g. after a fatal error).
    /// Returns `false` if it was already stopping.
    pub(crate) fn fail(&self) -> bool {
        self.move_to_stopping()
    }

    fn move_to_stopping(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if State::from_u8(current) >= State::Stopping {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                State::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(state) => current = state,
            }
        }
    }

    /// Mark shutdown as completed, waking all callers of
    /// [`Lifecycle::wait_stopped`].
    pub(crate) fn finish_stop(&self) {
        self.state.store(State::Stopped as u8, Ordering::Release);
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        self.stopped_cond.notify_all();
    }

    /// Block until [`Lifecycle::finish_stop`] is called.
    pub(crate) fn wait_stopped(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        while !*stopped {
            stopped = self
                .stopped_cond
                .wait(stopped)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state())
            .finish()
    }
}
