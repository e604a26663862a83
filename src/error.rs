//! Error types carried by failed program values.
//!
//! Errors are explicit and typed, never stringly. The taxonomy is small and
//! closed:
//!
//! - **Operational errors** ([`Error::Sys`]) capture the OS error code of a
//!   failed primitive and short-circuit every downstream bind.
//! - **Cancellation** ([`Error::Cancelled`]) marks a wait that was torn down
//!   before its resume continuation ever ran. It is a distinct variant, so
//!   the sentinel is always representable independent of the payload.
//!
//! Invariant violations (resuming a terminal value, double-registering a
//! dependent, a second pending wait on one descriptor) are *not* errors of
//! this type: they are contract breaches and panic immediately with
//! diagnostic context.

use core::fmt;
use std::io;

/// Captured OS error code (`errno`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    /// Captures the calling thread's current `errno`.
    #[must_use]
    pub fn last_os_error() -> Self {
        Self(io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }

    /// Extracts the OS error code from an [`io::Error`], if it carries one.
    #[must_use]
    pub fn from_io(err: &io::Error) -> Self {
        Self(err.raw_os_error().unwrap_or(0))
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errno {}", self.0)
    }
}

/// Failure payload of a program value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The underlying operation failed with an OS error.
    #[error("system error: {0}")]
    Sys(Errno),
    /// The operation was torn down before its resume continuation ran.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Captures the calling thread's current `errno` as an operational error.
    #[must_use]
    pub fn last_os_error() -> Self {
        Self::Sys(Errno::last_os_error())
    }

    /// Returns true for the cancellation sentinel.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Outcome of a resolved program value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_distinct_from_any_errno() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Sys(Errno(0)).is_cancelled());
        assert_ne!(Error::Cancelled, Error::Sys(Errno(libc::EINTR)));
    }

    #[test]
    fn display_carries_the_code() {
        assert_eq!(Error::Sys(Errno(2)).to_string(), "system error: errno 2");
        assert_eq!(Error::Cancelled.to_string(), "cancelled");
    }
}
