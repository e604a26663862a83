//! The four-kind state node family.
//!
//! A node is the resolved-or-pending content of a cell. Success and Failure
//! are terminal: once a cell holds one, it never changes again and never
//! accepts `process`, `cancel`, or `notify`. Waiting and Blocked are the two
//! pending kinds: Waiting is blocked on the reactor, Blocked is blocked on
//! another handle.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::os::fd::RawFd;

use smallvec::SmallVec;

use super::cell::Handle;
use crate::error::Error;

/// Resolution state of a program value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Terminal: the operation produced its values.
    Success,
    /// Terminal: the operation failed or was cancelled.
    Failure,
    /// Pending on the reactor: a descriptor event will resume it.
    Waiting,
    /// Pending on another handle: its resolution will unblock it.
    Blocked,
}

impl State {
    /// True for Success and Failure.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Waiting => "waiting",
            Self::Blocked => "blocked",
        };
        f.write_str(name)
    }
}

/// Resume continuation stored in a Waiting node; runs at most once.
pub(crate) type Resume = Box<dyn FnOnce(RawFd) -> Handle>;

/// Queued continuation consuming another handle's success values.
pub(crate) type Continuation = Box<dyn FnOnce(&dyn Any) -> Handle>;

/// Continuations queued on one Blocked node, in registration order.
pub(crate) type ContinuationList = SmallVec<[Continuation; 1]>;

/// One state node. The success payload is type-erased; the typed [`Io`]
/// front guarantees it downcasts to the advertised parameter.
///
/// [`Io`]: super::Io
pub(crate) enum Node {
    /// Stored success values.
    Success(Box<dyn Any>),
    /// Operational error or the cancellation sentinel.
    Failure(Error),
    /// Suspended on the reactor. The slot empties when the continuation is
    /// taken, making a second resumption detectable.
    Waiting(RefCell<Option<Resume>>),
    /// Suspended on another handle. An empty list is the pure forwarder: it
    /// adopts the resolved value unchanged.
    Blocked(RefCell<ContinuationList>),
}

impl Node {
    pub(crate) fn success(values: Box<dyn Any>) -> Self {
        Self::Success(values)
    }

    pub(crate) const fn failure(error: Error) -> Self {
        Self::Failure(error)
    }

    pub(crate) fn waiting(resume: Resume) -> Self {
        Self::Waiting(RefCell::new(Some(resume)))
    }

    pub(crate) fn blocked(continuations: ContinuationList) -> Self {
        Self::Blocked(RefCell::new(continuations))
    }

    /// A Blocked node with no continuations; resolves to whatever it was
    /// blocked on.
    pub(crate) fn forwarder() -> Self {
        Self::Blocked(RefCell::new(SmallVec::new()))
    }

    pub(crate) const fn state(&self) -> State {
        match self {
            Self::Success(_) => State::Success,
            Self::Failure(_) => State::Failure,
            Self::Waiting(_) => State::Waiting,
            Self::Blocked(_) => State::Blocked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Errno;

    #[test]
    fn state_display_names() {
        assert_eq!(State::Success.to_string(), "success");
        assert_eq!(State::Failure.to_string(), "failure");
        assert_eq!(State::Waiting.to_string(), "waiting");
        assert_eq!(State::Blocked.to_string(), "blocked");
    }

    #[test]
    fn only_success_and_failure_are_terminal() {
        assert!(State::Success.is_terminal());
        assert!(State::Failure.is_terminal());
        assert!(!State::Waiting.is_terminal());
        assert!(!State::Blocked.is_terminal());
    }

    #[test]
    fn node_kinds_report_their_state() {
        assert_eq!(Node::success(Box::new(1u8)).state(), State::Success);
        assert_eq!(
            Node::failure(Error::Sys(Errno(5))).state(),
            State::Failure
        );
        assert_eq!(Node::forwarder().state(), State::Blocked);
    }
}
