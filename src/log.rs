//! Logging related types.
//!
//! Logging in Anvil is done via the [`log`] crate, much like the entire Rust
//! ecosystem does (or should). However the log crate doesn't provide an actual
//! logging implementation, it only defines macros for it. Those macros are
//! re-exported here, which means that the macros in the `log` crate can also be
//! used.
//!
//! The actual logging implementation comes from the [`std-logger`] crate. By
//! default logs are written to standard error. To enable logging call
//! [`init`].
//!
//! [`log`]: https://crates.io/crates/log
//! [`std-logger`]: std_logger
//!
//! # Examples
//!
//! Enabling logging.
//!
//! ```no_run
//! use anvil::log::{self, info};
//!
//! // Enable logging.
//! log::init();
//!
//! info!("starting");
//! ```

#[doc(no_inline)]
pub use ::log::{debug, error, info, log, log_enabled, trace, warn};

#[doc(no_inline)]
pub use std_logger::{init, try_init};
