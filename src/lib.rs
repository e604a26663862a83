//! Riptide: continuation-based non-blocking I/O promises driven by a
//! single-threaded readiness reactor.
//!
//! # Overview
//!
//! A riptide program is a value, not a thread. [`Io<T>`] represents the
//! eventual outcome of a non-blocking operation; [`Io::bind`] sequences
//! operations without ever blocking, and a [`Reactor`] drives every
//! outstanding operation to completion by reacting to descriptor readiness.
//! Binding an already-resolved value runs the continuation immediately;
//! binding a pending value suspends the continuation until the value
//! resolves. Suspension is a data structure, never a parked thread.
//!
//! # Core Guarantees
//!
//! - **Exactly-once resumption**: a suspended wait's continuation runs at
//!   most once; resuming it twice is a detectable programming error.
//! - **No dangling waits**: a wait torn down before it is processed resolves
//!   to [`Error::Cancelled`] rather than being dropped unresolved.
//! - **Short-circuit failure**: once a value fails, every downstream bind is
//!   a no-op passthrough, including binds that were already suspended.
//! - **Terminal programs**: [`Reactor::run`] never returns a program that is
//!   still waiting or blocked; an unresolved program with no pending I/O is
//!   a fatal invariant violation, not a silent hang.
//!
//! # Module Structure
//!
//! - [`promise`]: the resolution core (state nodes, cells, bind, notification)
//! - [`reactor`]: descriptor watchers, pending waits, the dispatch loop
//! - [`fs`]: syscall-backed primitives (`open`, `read`, `write`, `close`)
//! - [`error`]: operational errors and the cancellation sentinel
//!
//! # Example
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use riptide::{fs, Reactor};
//!
//! let reactor = Reactor::new()?;
//! let inner = reactor.clone();
//! let program = fs::open(&reactor, "/dev/random").bind(move |fd| {
//!     let closer = inner.clone();
//!     fs::read(&inner, fd, 10).bind(move |buffer| {
//!         println!("read {} bytes", buffer.len());
//!         fs::close(&closer, fd)
//!     })
//! });
//! reactor.run(&program)?;
//! # Ok(())
//! # }
//! ```
//!
//! Riptide is Unix-only: it speaks raw file descriptors and epoll-style
//! readiness.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod fs;
pub mod promise;
pub mod reactor;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{Errno, Error, Result};
pub use promise::{failure, success, Io, State};
pub use reactor::{Interest, Reactor};
