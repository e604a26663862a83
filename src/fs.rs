//! Syscall-backed I/O primitives.
//!
//! Each primitive follows the same contract: an immediate failure returns
//! `failure` carrying the captured `errno`; transient unreadiness suspends
//! on the reactor with a resume continuation that performs the operation
//! once the descriptor is ready; an immediate success returns `success`.
//! The resolution core never looks inside these continuations.
//!
//! All descriptors are opened non-blocking; the reactor is passed
//! explicitly and registered descriptors belong to exactly one reactor.
#![allow(unsafe_code)]

use std::ffi::CString;
use std::os::fd::RawFd;

use tracing::trace;

use crate::error::{Errno, Error};
use crate::promise::{failure, success, Io};
use crate::reactor::{Interest, Reactor};

/// Opens `path` for non-blocking reading and registers the descriptor with
/// `reactor`.
pub fn open(reactor: &Reactor, path: &str) -> Io<RawFd> {
    let Ok(path) = CString::new(path) else {
        return failure(Error::Sys(Errno(libc::EINVAL)));
    };
    // SAFETY: `path` is a valid NUL-terminated string for the duration of
    // the call.
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_NONBLOCK) };
    if fd == -1 {
        return failure(Error::last_os_error());
    }
    if let Err(err) = reactor.register(fd) {
        // SAFETY: `fd` came from `open` above and is owned by nothing else.
        unsafe { libc::close(fd) };
        return failure(Error::Sys(Errno::from_io(&err)));
    }
    trace!(fd, "opened");
    success(fd)
}

/// Closes `fd`, cancelling any wait still pending on it.
///
/// The descriptor must have been registered with `reactor` (by [`open`] or
/// [`Reactor::register`]); it is unregistered before the underlying close
/// so a pending wait resolves to [`Error::Cancelled`] first.
pub fn close(reactor: &Reactor, fd: RawFd) -> Io<()> {
    if let Err(err) = reactor.unregister(fd) {
        return failure(Error::Sys(Errno::from_io(&err)));
    }
    // SAFETY: the descriptor is no longer registered with the poller and is
    // closed exactly once.
    if unsafe { libc::close(fd) } == -1 {
        return failure(Error::last_os_error());
    }
    trace!(fd, "closed");
    success(())
}

/// Reads up to `count` bytes once `fd` is readable.
///
/// The returned buffer is truncated to the bytes actually read; zero length
/// means end of stream.
pub fn read(reactor: &Reactor, fd: RawFd, count: usize) -> Io<Vec<u8>> {
    trace!(fd, count, "read suspending until readable");
    reactor.wait(fd, Interest::readable(), move |fd| {
        let mut buffer = vec![0u8; count];
        // SAFETY: `buffer` is a live allocation of exactly `count` bytes.
        let n = unsafe { libc::read(fd, buffer.as_mut_ptr().cast::<libc::c_void>(), count) };
        if n == -1 {
            return failure(Error::last_os_error());
        }
        #[allow(clippy::cast_sign_loss)]
        buffer.truncate(n as usize);
        trace!(fd, bytes = buffer.len(), "read completed");
        success(buffer)
    })
}

/// Writes `buffer` once `fd` is writable, yielding the number of bytes
/// accepted by the kernel (which may be short).
pub fn write(reactor: &Reactor, fd: RawFd, buffer: Vec<u8>) -> Io<usize> {
    trace!(fd, count = buffer.len(), "write suspending until writable");
    reactor.wait(fd, Interest::writable(), move |fd| {
        // SAFETY: `buffer` is a live allocation of `buffer.len()` bytes.
        let n = unsafe { libc::write(fd, buffer.as_ptr().cast::<libc::c_void>(), buffer.len()) };
        if n == -1 {
            return failure(Error::last_os_error());
        }
        trace!(fd, bytes = n, "write completed");
        #[allow(clippy::cast_sign_loss)]
        let written = n as usize;
        success(written)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Errno, Error};
    use crate::promise::State;
    use crate::test_utils::init_test_logging;

    #[test]
    fn open_missing_path_fails_with_the_os_error() {
        init_test_logging();
        let reactor = Reactor::new().expect("reactor");
        let opened = open(&reactor, "/no/such/path");
        assert_eq!(
            opened.try_result(),
            Some(Err(Error::Sys(Errno(libc::ENOENT))))
        );
    }

    #[test]
    fn open_with_interior_nul_is_rejected() {
        init_test_logging();
        let reactor = Reactor::new().expect("reactor");
        let opened = open(&reactor, "/dev/\0zero");
        assert_eq!(
            opened.try_result(),
            Some(Err(Error::Sys(Errno(libc::EINVAL))))
        );
    }

    #[test]
    fn open_and_close_a_character_device() {
        init_test_logging();
        let reactor = Reactor::new().expect("reactor");
        let opened = open(&reactor, "/dev/zero");
        let Some(Ok(fd)) = opened.try_result() else {
            panic!("open /dev/zero failed: {:?}", opened.try_result());
        };
        assert_eq!(close(&reactor, fd).try_result(), Some(Ok(())));
    }

    #[test]
    fn read_suspends_until_driven() {
        init_test_logging();
        let reactor = Reactor::new().expect("reactor");
        let fd = open(&reactor, "/dev/zero")
            .try_result()
            .expect("terminal")
            .expect("open");

        let pending = read(&reactor, fd, 8);
        assert_eq!(pending.state(), State::Waiting);

        let buffer = reactor.run(&pending).expect("read");
        assert_eq!(buffer, vec![0u8; 8]);
        assert_eq!(close(&reactor, fd).try_result(), Some(Ok(())));
    }

    #[test]
    fn close_of_an_unregistered_descriptor_fails() {
        init_test_logging();
        let reactor = Reactor::new().expect("reactor");
        let closed = close(&reactor, 999);
        assert!(matches!(closed.try_result(), Some(Err(Error::Sys(_)))));
    }
}
