//! Result type definition and extension traits for Railway-Oriented Programming.
//!
//! Provides a tap-style combinator so side effects such as logging can be
//! attached to a `Result` without unwrap/expect/panic.

use crate::error::Error;

/// The standard Result type for fnflow core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Generic extension trait for any Result type.
pub trait ResultExt<T, E> {
    /// Perform a side effect on the Err value without consuming the Result.
    #[must_use]
    fn tap_err<F: FnOnce(&E)>(self, f: F) -> Self;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E> {
    fn tap_err<F: FnOnce(&E)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}
