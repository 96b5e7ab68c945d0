//! Anvil, named after the thing [Hephaestus] hammers on, is the connection
//! layer of a TCP service: non-blocking sockets with explicit error values, a
//! supervised accept loop that hands every connection to its own thread, and a
//! shutdown protocol that is safe to trigger from any thread.
//!
//! [Hephaestus]: https://en.wikipedia.org/wiki/Hephaestus
//!
//! ## About
//!
//! All fallible operations return an [`ErrorOr`], a [`Result`] with the
//! crate's [`Error`] type. Errors are never thrown below the process boundary,
//! see the [`error`] module for the ways to escalate them.
//!
//! The main types are:
//!
//!  * [`Acceptor`] owns a [`ServerSocket`], accepts connections on its own
//!    thread and starts a [`ConnectionWorker`] for each,
//!  * [`ConnectionWorker`] owns a single [`ClientSocket`] and reads from it on
//!    its own thread, passing the bytes to a [`Handler`],
//!  * [`net`] contains the socket types themselves.
//!
//! [`ServerSocket`]: crate::net::ServerSocket
//! [`ClientSocket`]: crate::net::ClientSocket
//!
//! ## Getting started
//!
//! ```no_run
//! use std::thread::sleep;
//! use std::time::Duration;
//!
//! use anvil::{Acceptor, ErrorOr};
//!
//! fn main() -> ErrorOr<()> {
//!     let acceptor = Acceptor::create(8080, "127.0.0.1")?;
//!     println!("listening on {}", acceptor.local_address());
//!     while acceptor.is_running() {
//!         sleep(Duration::from_secs(1));
//!     }
//!     Ok(())
//! }
//! ```

#![warn(
    anonymous_parameters,
    bare_trait_objects,
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    variant_size_differences
)]
// Disallow warnings when running tests.
#![cfg_attr(test, deny(warnings))]

#[cfg(not(unix))]
compile_error!("Anvil currently only supports Unix-like systems.");

/// Helper macro to execute a system call that returns an `io::Result`.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)? ) ) => {{
        let res = unsafe { libc::$fn($( $arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub mod acceptor;
pub mod error;
pub mod handler;
pub mod log;
pub mod net;
pub mod signal;
pub mod worker;

mod lifecycle;

#[doc(no_inline)]
pub use acceptor::Acceptor;
#[doc(no_inline)]
pub use error::{Error, ErrorOr, ErrorOrExt, Fault};
#[doc(no_inline)]
pub use handler::{Handler, NewHandler};
#[doc(no_inline)]
pub use lifecycle::State;
#[doc(no_inline)]
pub use worker::ConnectionWorker;

/// Attempts to extract a message from a panic, defaulting to `<unknown>`.
/// NOTE: be sure to derefence the `Box`!
#[doc(hidden)] // Not part of the stable API.
pub fn panic_message<'a>(panic: &'a (dyn std::any::Any + Send + 'static)) -> &'a str {
    match panic.downcast_ref::<&'static str>() {
        Some(s) => s,
        None => match panic.downcast_ref::<String>() {
            Some(s) => s,
            None => "<unknown>",
        },
    }
}
