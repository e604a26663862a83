//! The typed front over the untyped resolution graph.
//!
//! [`Io<T>`] pins the success payload type at the API boundary; inside the
//! graph, payloads and continuations are type-erased. The constructors and
//! [`Io::bind`] are the only places values cross that boundary, so a failed
//! downcast can only mean the crate's own typing discipline was broken and
//! panics accordingly.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use smallvec::smallvec;
use tracing::trace;

use super::aggregate;
use super::cell::Handle;
use super::node::{Continuation, Node, State};
use crate::error::{Error, Result};

/// A program value: the eventual outcome of a non-blocking operation with
/// success type `T`.
///
/// Cloning is cheap and aliases the same underlying cell; equality is cell
/// identity. `T` is the payload handed to bound continuations; it must be
/// `Clone` because several continuations may consume the same resolution.
pub struct Io<T> {
    handle: Handle,
    _value: PhantomData<T>,
}

impl<T> Clone for Io<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> PartialEq for Io<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl<T> Eq for Io<T> {}

impl<T> fmt::Debug for Io<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Io")
            .field("cell", &self.handle.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Constructs a resolved program value.
pub fn success<T: 'static>(value: T) -> Io<T> {
    Io::from_handle(Handle::new(Node::success(Box::new(value))))
}

/// Constructs a failed program value.
pub fn failure<T>(error: Error) -> Io<T> {
    Io::from_handle(Handle::new(Node::failure(error)))
}

impl<T> Io<T> {
    pub(crate) fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            _value: PhantomData,
        }
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn into_handle(self) -> Handle {
        self.handle
    }

    /// Current resolution state.
    #[must_use]
    pub fn state(&self) -> State {
        self.handle.state()
    }
}

impl<T: Clone + 'static> Io<T> {
    /// Sequences `f` after this value.
    ///
    /// Already resolved: `f` runs synchronously with the stored values and
    /// its result is returned directly, with no suspension. Already failed:
    /// the same failure aliases through and `f` never runs. Still pending:
    /// one new cell suspends `f` until this value resolves.
    pub fn bind<U, F>(&self, f: F) -> Io<U>
    where
        U: 'static,
        F: FnOnce(T) -> Io<U> + 'static,
    {
        match self.state() {
            State::Success => {
                trace!(cell = self.handle.id(), "bind on resolved value; running now");
                f(self.cloned_value())
            }
            State::Failure => {
                trace!(cell = self.handle.id(), "bind on failed value; propagating");
                Io::from_handle(self.handle.clone())
            }
            State::Waiting | State::Blocked => {
                let blocked = Handle::new(Node::blocked(smallvec![erase(f)]));
                trace!(
                    cell = self.handle.id(),
                    suspended = blocked.id(),
                    "bind on pending value; suspending"
                );
                self.handle.add_dependent(&blocked);
                Io::from_handle(blocked)
            }
        }
    }

    /// Attaches two continuations to one suspension point.
    ///
    /// Both always run when this value succeeds; their results are merged by
    /// the aggregation policy (earliest failure wins, otherwise `g`'s value).
    /// On a pending receiver this queues both continuations on a single
    /// blocked cell rather than allocating one per bind.
    pub fn bind_pair<U, F, G>(&self, f: F, g: G) -> Io<U>
    where
        U: 'static,
        F: FnOnce(T) -> Io<U> + 'static,
        G: FnOnce(T) -> Io<U> + 'static,
    {
        match self.state() {
            State::Success => {
                let value = self.cloned_value();
                let first = f(value.clone()).into_handle();
                let second = g(value).into_handle();
                Io::from_handle(aggregate::merge_all(vec![first, second]))
            }
            State::Failure => Io::from_handle(self.handle.clone()),
            State::Waiting | State::Blocked => {
                let blocked = Handle::new(Node::blocked(smallvec![erase(f), erase(g)]));
                trace!(
                    cell = self.handle.id(),
                    suspended = blocked.id(),
                    "bind_pair on pending value; suspending both"
                );
                self.handle.add_dependent(&blocked);
                Io::from_handle(blocked)
            }
        }
    }

    /// The outcome, if this value has resolved; `None` while pending.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<T>> {
        let node = self.handle.node();
        match &*node {
            Node::Success(values) => Some(Ok(downcast_value::<T>(values.as_ref()))),
            Node::Failure(error) => Some(Err(*error)),
            Node::Waiting(_) | Node::Blocked(_) => None,
        }
    }

    fn cloned_value(&self) -> T {
        let node = self.handle.node();
        let Node::Success(values) = &*node else {
            panic!("[{}] no stored values in {} state", self.handle.id(), node.state());
        };
        downcast_value::<T>(values.as_ref())
    }
}

/// Recovers the typed payload from an erased success value.
fn downcast_value<T: Clone + 'static>(values: &dyn Any) -> T {
    values
        .downcast_ref::<T>()
        .unwrap_or_else(|| {
            panic!("success payload is not a {}", std::any::type_name::<T>())
        })
        .clone()
}

/// Erases a typed continuation for queueing on a Blocked node.
fn erase<T, U, F>(f: F) -> Continuation
where
    T: Clone + 'static,
    U: 'static,
    F: FnOnce(T) -> Io<U> + 'static,
{
    Box::new(move |values: &dyn Any| f(downcast_value::<T>(values)).into_handle())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Errno;
    use crate::test_utils::init_test_logging;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// A pending value that resolves to `value` when processed.
    fn pending(value: i32) -> Io<i32> {
        Io::from_handle(Handle::new(Node::waiting(Box::new(move |_fd| {
            success(value).into_handle()
        }))))
    }

    #[test]
    fn left_identity_runs_synchronously_without_suspension() {
        init_test_logging();
        let ran = Rc::new(std::cell::Cell::new(false));
        let flag = ran.clone();

        let result = success(5).bind(move |v| {
            flag.set(true);
            success(v + 1)
        });

        assert!(ran.get());
        assert_eq!(result.state(), State::Success);
        assert_eq!(result.try_result(), Some(Ok(6)));
    }

    #[test]
    fn failure_short_circuits_and_aliases_the_same_cell() {
        init_test_logging();
        let failed: Io<i32> = failure(Error::Sys(Errno(9)));
        let result: Io<()> = failed.bind(|_| panic!("continuation must never run"));

        assert_eq!(result.handle(), failed.handle());
        assert_eq!(result.try_result(), Some(Err(Error::Sys(Errno(9)))));
    }

    #[test]
    fn bind_on_pending_suspends_one_dependent() {
        init_test_logging();
        let source = pending(1);
        let chained = source.bind(|v| success(v * 2));

        assert_eq!(chained.state(), State::Blocked);
        assert_eq!(source.handle().dependent_count(), 1);
        assert_eq!(chained.try_result(), None);

        source.handle().process(0);
        assert_eq!(chained.try_result(), Some(Ok(2)));
    }

    #[test]
    fn independent_binds_wake_in_reverse_registration_order() {
        init_test_logging();
        let order = Rc::new(RefCell::new(Vec::new()));
        let source = pending(7);

        let first_log = order.clone();
        let first = source.bind(move |v| {
            first_log.borrow_mut().push(("first", v));
            success(())
        });
        let second_log = order.clone();
        let second = source.bind(move |v| {
            second_log.borrow_mut().push(("second", v));
            success(())
        });

        source.handle().process(0);

        assert_eq!(*order.borrow(), vec![("second", 7), ("first", 7)]);
        assert_eq!(first.state(), State::Success);
        assert_eq!(second.state(), State::Success);
    }

    #[test]
    fn bind_pair_queues_both_on_one_cell_and_merges_last_value() {
        init_test_logging();
        let ran = Rc::new(RefCell::new(Vec::new()));
        let source = pending(3);

        let f_log = ran.clone();
        let g_log = ran.clone();
        let merged = source.bind_pair(
            move |v| {
                f_log.borrow_mut().push("f");
                success(v + 10)
            },
            move |v| {
                g_log.borrow_mut().push("g");
                success(v + 20)
            },
        );

        assert_eq!(source.handle().dependent_count(), 1);
        source.handle().process(0);

        assert_eq!(*ran.borrow(), vec!["f", "g"]);
        assert_eq!(merged.try_result(), Some(Ok(23)));
    }

    #[test]
    fn bind_pair_earliest_failure_wins() {
        init_test_logging();
        let source = pending(3);
        let merged = source.bind_pair(
            |_| failure::<i32>(Error::Sys(Errno(13))),
            |v| success(v),
        );

        source.handle().process(0);
        assert_eq!(merged.try_result(), Some(Err(Error::Sys(Errno(13)))));
    }

    #[test]
    fn bind_pair_on_resolved_value_merges_immediately() {
        init_test_logging();
        let merged = success(2).bind_pair(|v| success(v + 1), |v| success(v * 10));
        assert_eq!(merged.try_result(), Some(Ok(20)));
    }

    #[test]
    fn continuation_returning_a_pending_value_forwards() {
        init_test_logging();
        let second = pending(42);
        let second_for_bind = second.clone();
        let source = pending(0);
        let chained = source.bind(move |_| second_for_bind);

        source.handle().process(0);
        assert_eq!(chained.state(), State::Blocked);
        assert_eq!(chained.try_result(), None);

        second.handle().process(0);
        assert_eq!(chained.try_result(), Some(Ok(42)));
    }

    #[test]
    fn cancellation_propagates_through_suspended_binds() {
        init_test_logging();
        let source = pending(1);
        let chained = source
            .bind(|v| success(v + 1))
            .bind(|_| -> Io<()> { panic!("must not run after cancellation") });

        source.handle().cancel();
        assert_eq!(chained.try_result(), Some(Err(Error::Cancelled)));
    }
}
