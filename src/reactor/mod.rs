//! Single-threaded readiness reactor.
//!
//! The reactor owns the only shared resource in the system: the table
//! mapping descriptors to their persistent watcher and at most one pending
//! wait. [`Reactor::wait`] is the sole producer of Waiting cells; readiness
//! dispatch is the sole consumer.
//!
//! # Model
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`Reactor::register`] | installs a disarmed watcher for a descriptor |
//! | [`Reactor::wait`] | arms one wait; a second pending wait is fatal |
//! | readiness dispatch | takes the wait and resumes its cell exactly once |
//! | [`Reactor::unregister`] | removes the watcher, cancelling a pending wait |
//! | [`Reactor::run`] | pumps dispatch until no waits remain, then demands a terminal program |
//!
//! The backend (the `polling` crate) is used in oneshot mode: delivery
//! disarms the descriptor, so a watcher only fires while a wait is armed on
//! it. Every pending wait is wrapped in a guard whose release path cancels
//! the suspended cell exactly once, so tearing down a descriptor or the
//! whole table never leaves a Waiting cell dropped unresolved.
//!
//! The reactor is an explicit value passed to every primitive; there is no
//! ambient default instance. Cloning is cheap and aliases the same
//! instance, which is what continuations capture to issue follow-up I/O.

mod interest;

pub use interest::Interest;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;

use polling::{Event as PollEvent, Poller};
use tracing::{debug, trace};

use crate::error::{Errno, Error, Result};
use crate::promise::{failure, Handle, Io, Node};

/// Scoped ownership of one suspended wait.
///
/// Consuming [`WaitGuard::process`] resumes the cell; a guard dropped
/// unprocessed (descriptor removed, table torn down) cancels it instead.
/// Either way the cell resolves exactly once.
struct WaitGuard {
    handle: Handle,
    processed: bool,
}

impl WaitGuard {
    fn new(handle: Handle) -> Self {
        Self {
            handle,
            processed: false,
        }
    }

    fn process(mut self, fd: RawFd) {
        self.processed = true;
        self.handle.process(fd);
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if !self.processed {
            self.handle.cancel();
        }
    }
}

/// One armed wait: the interest it subscribed to plus the guard owning the
/// suspended cell.
struct PendingWait {
    interest: Interest,
    guard: WaitGuard,
}

/// Per-descriptor entry: the watcher persists, the wait slot holds at most
/// one armed wait.
#[derive(Default)]
struct Watcher {
    pending: Option<PendingWait>,
}

struct Inner {
    poller: Poller,
    watchers: RefCell<HashMap<RawFd, Watcher>>,
}

/// Single-threaded readiness-driven dispatch loop.
///
/// Clones alias one instance; continuations capture a clone to issue
/// follow-up waits.
#[derive(Clone)]
pub struct Reactor {
    inner: Rc<Inner>,
}

impl Reactor {
    /// Creates a reactor with an empty watcher table.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            inner: Rc::new(Inner {
                poller: Poller::new()?,
                watchers: RefCell::new(HashMap::new()),
            }),
        })
    }

    /// Installs a persistent, disarmed watcher for `fd`.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the descriptor is already registered.
    pub fn register(&self, fd: RawFd) -> io::Result<()> {
        let mut watchers = self.inner.watchers.borrow_mut();
        if watchers.contains_key(&fd) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "descriptor already registered",
            ));
        }
        self.inner.poller.add(fd, PollEvent::none(key_of(fd)))?;
        watchers.insert(fd, Watcher::default());
        debug!(fd, "watcher installed");
        Ok(())
    }

    /// Removes the watcher for `fd`.
    ///
    /// A wait still pending on the descriptor is resolved immediately to
    /// [`Error::Cancelled`] through its guard rather than left dangling.
    ///
    /// # Errors
    ///
    /// `NotFound` if the descriptor is not registered.
    pub fn unregister(&self, fd: RawFd) -> io::Result<()> {
        let watcher = self.inner.watchers.borrow_mut().remove(&fd).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "descriptor not registered")
        })?;
        // The cancellation cascade may re-enter the reactor, so the table
        // borrow above must already be released.
        drop(watcher);
        self.inner.poller.delete(fd)?;
        debug!(fd, "watcher removed");
        Ok(())
    }

    /// Suspends `resume` until `fd` reports one of the `interest` events,
    /// returning the suspended value immediately.
    ///
    /// Panics if the descriptor has no watcher or already has a pending
    /// wait: one descriptor carries at most one outstanding wait, and a
    /// second is a programming error, not a queued request.
    pub fn wait<T, F>(&self, fd: RawFd, interest: Interest, resume: F) -> Io<T>
    where
        T: 'static,
        F: FnOnce(RawFd) -> Io<T> + 'static,
    {
        {
            let watchers = self.inner.watchers.borrow();
            let watcher = watchers
                .get(&fd)
                .unwrap_or_else(|| panic!("waiting on unregistered descriptor {fd}"));
            assert!(
                watcher.pending.is_none(),
                "descriptor {fd} already has a pending wait"
            );
        }

        // Arm before building the cell: a failed arm surfaces as an
        // operational failure and no Waiting cell ever exists for it.
        if let Err(err) = self.inner.poller.modify(fd, interest.to_event(key_of(fd))) {
            return failure(Error::Sys(Errno::from_io(&err)));
        }

        let handle = Handle::new(Node::waiting(Box::new(move |fd| {
            resume(fd).into_handle()
        })));
        let guard = WaitGuard::new(handle.clone());
        self.inner
            .watchers
            .borrow_mut()
            .get_mut(&fd)
            .unwrap_or_else(|| panic!("watcher for descriptor {fd} vanished"))
            .pending = Some(PendingWait { interest, guard });
        trace!(fd, cell = handle.id(), ?interest, "wait armed");
        Io::from_handle(handle)
    }

    /// Drives every armed wait to resolution, then returns the program's
    /// outcome.
    ///
    /// Panics if the program is still Waiting or Blocked once no armed
    /// waits remain: an unresolved program with no pending I/O means a lost
    /// wake-up or a leaked dependency.
    pub fn run<T: Clone + 'static>(&self, program: &Io<T>) -> Result<T> {
        let mut events: Vec<PollEvent> = Vec::new();
        while self.pending_waits() > 0 {
            events.clear();
            match self.inner.poller.wait(&mut events, None) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => panic!("reactor poll failed: {err}"),
            }
            for event in &events {
                self.dispatch(event);
            }
        }
        match program.try_result() {
            Some(outcome) => {
                debug!(state = %program.state(), "program terminated");
                outcome
            }
            None => panic!("program terminated in {} state", program.state()),
        }
    }

    /// Resumes the wait armed on the event's descriptor, if its interest
    /// intersects the delivered readiness.
    fn dispatch(&self, event: &PollEvent) {
        let fd = fd_of(event.key);
        let ready = Interest::from_event(event);
        let taken = {
            let mut watchers = self.inner.watchers.borrow_mut();
            match watchers.get_mut(&fd) {
                Some(watcher)
                    if watcher
                        .pending
                        .as_ref()
                        .is_some_and(|wait| wait.interest.intersects(ready)) =>
                {
                    watcher.pending.take()
                }
                _ => None,
            }
        };
        let Some(wait) = taken else {
            trace!(fd, ?ready, "event without a matching pending wait ignored");
            return;
        };
        debug!(fd, ?ready, "descriptor ready");
        wait.guard.process(fd);
    }

    fn pending_waits(&self) -> usize {
        self.inner
            .watchers
            .borrow()
            .values()
            .filter(|watcher| watcher.pending.is_some())
            .count()
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let watchers = self.inner.watchers.borrow();
        f.debug_struct("Reactor")
            .field("watchers", &watchers.len())
            .field("pending_waits", &self.pending_waits())
            .finish_non_exhaustive()
    }
}

fn key_of(fd: RawFd) -> usize {
    usize::try_from(fd).expect("negative descriptor")
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn fd_of(key: usize) -> RawFd {
    key as RawFd
}
