//! Module containing the error types.
//!
//! Every fallible operation in this crate returns an [`ErrorOr`], which is
//! simply a [`Result`] with [`Error`] as error type. An `Error` is a plain
//! value: a [`Domain`], a [`Kind`] and a human readable message.
//!
//! There are three ways to deal with an error, using [`ErrorOrExt`] where
//! needed:
//!
//!  * propagate it with the `?` operator, returning the identical error to the
//!    caller,
//!  * [`must`], which terminates the process if the operation failed. Only use
//!    this when an error is impossible (or unrecoverable),
//!  * [`or_raise`], which converts the error into a [`Fault`] carrying the
//!    location where it was raised. This is only meant to be used at the process
//!    boundary, e.g. in `main`.
//!
//! [`must`]: ErrorOrExt::must
//! [`or_raise`]: ErrorOrExt::or_raise
//!
//! # Examples
//!
//! ```
//! use anvil::error::{Domain, Error, ErrorOr, ErrorOrExt};
//!
//! fn produce(fail: bool) -> ErrorOr<usize> {
//!     if fail {
//!         Err(Error::from_errno(libc::EINVAL, "foo()", Domain::Core))
//!     } else {
//!         Ok(10)
//!     }
//! }
//!
//! fn add_two(fail: bool) -> ErrorOr<usize> {
//!     let value = produce(fail)?;
//!     Ok(value + 2)
//! }
//!
//! assert_eq!(add_two(false).release_value(), 12);
//! let err = add_two(true).release_error();
//! assert_eq!(err.message(), "foo() failed with EINVAL(22) Invalid argument");
//! ```

use std::ffi::CStr;
use std::os::raw::c_char;
use std::panic::Location;
use std::{fmt, io, process};

use log::error;

/// Result of a fallible operation, either a value `T` or an [`Error`].
///
/// `ErrorOr<()>` is used for operations that don't return a value on success.
pub type ErrorOr<T = ()> = Result<T, Error>;

/// Broad category of an [`Error`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Domain {
    /// Core logic.
    Core,
    /// Filesystem.
    File,
    /// Network.
    Network,
}

/// The shape of an [`Error`], independent of its [`Domain`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Kind {
    /// Any failure that isn't a timeout.
    Generic,
    /// The operation didn't complete within the given time.
    Timeout,
}

/// Error value returned by all fallible operations.
///
/// An `Error` can only be created using one of its named constructors and
/// can't be modified after creation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
    domain: Domain,
    kind: Kind,
    message: String,
    /// Set if the error was created from an OS error code.
    os_code: Option<i32>,
}

impl Error {
    /// Create an error from the OS error number `errnum` returned by `call`.
    ///
    /// The message will be in the form `$call failed with $NAME($errnum)
    /// $description`, for example `socket() failed with EMFILE(24) Too many
    /// open files`.
    pub fn from_errno(errnum: i32, call: &str, domain: Domain) -> Error {
        let message = format!(
            "{} failed with {}({}) {}",
            call,
            errno_name(errnum),
            errnum,
            errno_description(errnum)
        );
        Error {
            domain,
            kind: Kind::Generic,
            message,
            os_code: Some(errnum),
        }
    }

    /// Create an error from an [`io::Error`] returned by `call`.
    ///
    /// If `err` holds an OS error code this is the same as calling
    /// [`Error::from_errno`], otherwise the description of `err` is used.
    pub fn from_io(err: &io::Error, call: &str, domain: Domain) -> Error {
        match err.raw_os_error() {
            Some(errnum) => Error::from_errno(errnum, call, domain),
            None => Error::from_string(format!("{} failed: {}", call, err), domain, Kind::Generic),
        }
    }

    /// Create an error using `message` as-is.
    pub fn from_string<M>(message: M, domain: Domain, kind: Kind) -> Error
    where
        M: Into<String>,
    {
        Error {
            domain,
            kind,
            message: message.into(),
            os_code: None,
        }
    }

    /// Create a [timeout] error for `call`.
    ///
    /// [timeout]: Kind::Timeout
    pub fn from_timeout(call: &str, domain: Domain) -> Error {
        Error {
            domain,
            kind: Kind::Timeout,
            message: format!("{} timeout", call),
            os_code: None,
        }
    }

    /// Returns the domain of the error.
    pub const fn domain(&self) -> Domain {
        self.domain
    }

    /// Returns the kind of error.
    pub const fn kind(&self) -> Kind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the OS error code, if the error was created from one.
    pub const fn os_code(&self) -> Option<i32> {
        self.os_code
    }

    /// Returns `true` if this is a [timeout] error.
    ///
    /// [timeout]: Kind::Timeout
    pub fn is_timeout(&self) -> bool {
        self.kind == Kind::Timeout
    }

    /// Convert the error into a [`Fault`], appending the location of the
    /// caller to the message.
    ///
    /// The domain of the error determines the variant of the fault.
    #[track_caller]
    pub fn raise(self) -> Fault {
        self.raise_at(Location::caller())
    }

    fn raise_at(self, location: &Location<'_>) -> Fault {
        let message = format!(
            "{} [{}:{}]",
            self.message,
            base_file_name(location.file()),
            location.line()
        );
        match self.domain {
            Domain::Core => Fault::Core(message),
            Domain::File => Fault::File(message),
            Domain::Network => Fault::Network(message),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {}

/// Returns the base name of `path`, i.e. everything after the last `/`.
fn base_file_name(path: &str) -> &str {
    match path.rfind(|c: char| c == '/' || c == '\\') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Extension trait for [`ErrorOr`].
///
/// Provides the inspection methods and the escalation primitives, `must` and
/// `or_raise`, on top of what [`Result`] already offers.
pub trait ErrorOrExt<T> {
    /// Returns `true` if this holds a value.
    fn is_value(&self) -> bool;

    /// Returns `true` if this holds an error.
    fn is_error(&self) -> bool;

    /// Returns `true` if this holds a [timeout] error.
    ///
    /// [timeout]: Kind::Timeout
    fn is_timeout_error(&self) -> bool;

    /// Returns a reference to the value.
    ///
    /// # Panics
    ///
    /// This will panic if this holds an error.
    fn value(&self) -> &T;

    /// Returns a reference to the error.
    ///
    /// # Panics
    ///
    /// This will panic if this holds a value.
    fn error(&self) -> &Error;

    /// Returns the value.
    ///
    /// # Panics
    ///
    /// This will panic if this holds an error.
    fn release_value(self) -> T;

    /// Returns the error.
    ///
    /// # Panics
    ///
    /// This will panic if this holds a value.
    fn release_error(self) -> Error;

    /// Returns the value, or logs the error and aborts the process.
    fn must(self) -> T;

    /// Returns the value, or converts the error into a [`Fault`] using
    /// [`Error::raise`].
    fn or_raise(self) -> Result<T, Fault>;
}

impl<T> ErrorOrExt<T> for ErrorOr<T> {
    fn is_value(&self) -> bool {
        self.is_ok()
    }

    fn is_error(&self) -> bool {
        self.is_err()
    }

    fn is_timeout_error(&self) -> bool {
        matches!(self, Err(err) if err.is_timeout())
    }

    #[track_caller]
    fn value(&self) -> &T {
        match self {
            Ok(value) => value,
            Err(err) => panic!("called `value` on an error: {}", err),
        }
    }

    #[track_caller]
    fn error(&self) -> &Error {
        match self {
            Ok(_) => panic!("called `error` on a value"),
            Err(err) => err,
        }
    }

    #[track_caller]
    fn release_value(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => panic!("called `release_value` on an error: {}", err),
        }
    }

    #[track_caller]
    fn release_error(self) -> Error {
        match self {
            Ok(_) => panic!("called `release_error` on a value"),
            Err(err) => err,
        }
    }

    #[track_caller]
    fn must(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                let location = Location::caller();
                error!(
                    "fatal error: {} [{}:{}]",
                    err,
                    base_file_name(location.file()),
                    location.line()
                );
                process::abort()
            }
        }
    }

    #[track_caller]
    fn or_raise(self) -> Result<T, Fault> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(err.raise_at(Location::caller())),
        }
    }
}

/// An [`Error`] raised at the process boundary.
///
/// Created by [`Error::raise`] or [`ErrorOrExt::or_raise`]. The variant is
/// determined by the [`Domain`] of the error, allowing file and network
/// failures to be handled differently.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    /// Raised [`Domain::Core`] error.
    Core(String),
    /// Raised [`Domain::File`] error.
    File(String),
    /// Raised [`Domain::Network`] error.
    Network(String),
}

impl Fault {
    /// Returns the domain of the raised error.
    pub const fn domain(&self) -> Domain {
        match self {
            Fault::Core(_) => Domain::Core,
            Fault::File(_) => Domain::File,
            Fault::Network(_) => Domain::Network,
        }
    }

    /// Returns the message, including the location it was raised at.
    pub fn message(&self) -> &str {
        match self {
            Fault::Core(msg) | Fault::File(msg) | Fault::Network(msg) => msg,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for Fault {}

/// Returns the name of the POSIX constant for `errnum`, e.g. `EINVAL`.
fn errno_name(errnum: i32) -> &'static str {
    match errnum {
        libc::EPERM => "EPERM",
        libc::ENOENT => "ENOENT",
        libc::EINTR => "EINTR",
        libc::EIO => "EIO",
        libc::EBADF => "EBADF",
        libc::EAGAIN => "EAGAIN",
        libc::ENOMEM => "ENOMEM",
        libc::EACCES => "EACCES",
        libc::EFAULT => "EFAULT",
        libc::EBUSY => "EBUSY",
        libc::EEXIST => "EEXIST",
        libc::ENOTDIR => "ENOTDIR",
        libc::EISDIR => "EISDIR",
        libc::EINVAL => "EINVAL",
        libc::ENFILE => "ENFILE",
        libc::EMFILE => "EMFILE",
        libc::ENOSPC => "ENOSPC",
        libc::EPIPE => "EPIPE",
        libc::ENOSYS => "ENOSYS",
        libc::ENOTSOCK => "ENOTSOCK",
        libc::EDESTADDRREQ => "EDESTADDRREQ",
        libc::EPROTOTYPE => "EPROTOTYPE",
        libc::ENOPROTOOPT => "ENOPROTOOPT",
        libc::EPROTONOSUPPORT => "EPROTONOSUPPORT",
        libc::EOPNOTSUPP => "EOPNOTSUPP",
        libc::EAFNOSUPPORT => "EAFNOSUPPORT",
        libc::EADDRINUSE => "EADDRINUSE",
        libc::EADDRNOTAVAIL => "EADDRNOTAVAIL",
        libc::ENETDOWN => "ENETDOWN",
        libc::ENETUNREACH => "ENETUNREACH",
        libc::ECONNABORTED => "ECONNABORTED",
        libc::ECONNRESET => "ECONNRESET",
        libc::ENOBUFS => "ENOBUFS",
        libc::EISCONN => "EISCONN",
        libc::ENOTCONN => "ENOTCONN",
        libc::ETIMEDOUT => "ETIMEDOUT",
        libc::ECONNREFUSED => "ECONNREFUSED",
        libc::EHOSTUNREACH => "EHOSTUNREACH",
        libc::EALREADY => "EALREADY",
        libc::EINPROGRESS => "EINPROGRESS",
        libc::EPROTO => "EPROTO",
        _ => "UNKNOWN",
    }
}

/// Returns the OS provided description for `errnum`, e.g. `Invalid argument`.
fn errno_description(errnum: i32) -> String {
    let mut buf: [c_char; 256] = [0; 256];
    // NOTE: the libc crate links this to the XSI compliant version.
    let res = unsafe { libc::strerror_r(errnum, buf.as_mut_ptr(), buf.len()) };
    if res != 0 {
        return format!("Unknown error {}", errnum);
    }
    // Safety: `strerror_r` always nul terminates the buffer on success.
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}
