//! Cells and handles: the shared mutable indirection behind every program
//! value.
//!
//! A [`Handle`] is a cheap, identity-comparable reference to a [`Cell`]; a
//! cell holds the current [`Node`] plus the ordered list of handles blocked
//! on it. Resolution replaces the node and wakes the dependents; aliases of
//! the handle keep observing the same cell throughout.

use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;
use tracing::{debug, trace};

use super::aggregate;
use super::node::{ContinuationList, Node, State};
use crate::error::Error;

/// Handles registered on a cell, in registration order. Woken LIFO.
pub(crate) type DependentList = SmallVec<[Handle; 2]>;

fn next_cell_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// The indirection box: one current node plus everything blocked on it.
///
/// Identity is allocation identity; the `id` exists for diagnostics only.
pub(crate) struct Cell {
    id: u64,
    node: RefCell<Rc<Node>>,
    dependents: RefCell<DependentList>,
}

impl Drop for Cell {
    fn drop(&mut self) {
        // A dependent still registered here can never be woken again.
        let leaked = self.dependents.borrow().len();
        if leaked != 0 && !std::thread::panicking() {
            panic!("[{}] cell destroyed with {leaked} dependents still registered", self.id);
        }
    }
}

/// Shared, identity-comparable reference to a cell.
#[derive(Clone)]
pub(crate) struct Handle {
    cell: Rc<Cell>,
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for Handle {}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("cell", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl Handle {
    pub(crate) fn new(node: Node) -> Self {
        let handle = Self {
            cell: Rc::new(Cell {
                id: next_cell_id(),
                node: RefCell::new(Rc::new(node)),
                dependents: RefCell::new(SmallVec::new()),
            }),
        };
        trace!(cell = handle.id(), state = %handle.state(), "cell created");
        handle
    }

    pub(crate) fn id(&self) -> u64 {
        self.cell.id
    }

    /// Snapshot of the current node.
    pub(crate) fn node(&self) -> Rc<Node> {
        self.cell.node.borrow().clone()
    }

    pub(crate) fn state(&self) -> State {
        self.node().state()
    }

    #[cfg(test)]
    pub(crate) fn dependent_count(&self) -> usize {
        self.cell.dependents.borrow().len()
    }

    /// Becomes `target`: replaces this cell's node with `target`'s current
    /// node and drains `target`'s dependents into this cell, appending in
    /// their original order.
    ///
    /// Terminal nodes end up shared between the two cells, exactly like the
    /// aliasing this exists to preserve. Panics on a self-transition or when
    /// this cell is already terminal.
    pub(crate) fn transition(&self, target: &Handle) {
        assert!(self != target, "[{}] cell transitioned into itself", self.id());
        assert!(
            !self.state().is_terminal(),
            "[{}] {} cell cannot transition again",
            self.id(),
            self.state()
        );
        trace!(
            cell = self.id(),
            from = %self.state(),
            target = target.id(),
            to = %target.state(),
            "transition"
        );
        *self.cell.node.borrow_mut() = target.node();

        let moved: DependentList = std::mem::take(&mut *target.cell.dependents.borrow_mut());
        if !moved.is_empty() {
            trace!(cell = self.id(), count = moved.len(), "dependents moved across transition");
        }
        self.cell.dependents.borrow_mut().extend(moved);
    }

    /// Registers `dependent` to be woken when this cell resolves.
    ///
    /// Double registration is a logic error and panics; it is prevented, not
    /// deduplicated.
    pub(crate) fn add_dependent(&self, dependent: &Handle) {
        let mut dependents = self.cell.dependents.borrow_mut();
        assert!(
            dependents.iter().all(|d| d != dependent),
            "[{}] dependent [{}] registered twice",
            self.id(),
            dependent.id()
        );
        trace!(cell = self.id(), dependent = dependent.id(), "dependent registered");
        dependents.push(dependent.clone());
    }

    /// Wakes everything blocked on this cell, most recently registered
    /// first. Requires a terminal node.
    ///
    /// The dependents held at call time are drained as a snapshot; a
    /// dependent registered on a terminal cell *during* the drain could
    /// never have suspended legitimately, so the list must still be empty
    /// afterwards.
    pub(crate) fn notify(&self) {
        let state = self.state();
        assert!(state.is_terminal(), "[{}] notify on a {state} cell", self.id());

        let drained: DependentList = std::mem::take(&mut *self.cell.dependents.borrow_mut());
        if drained.is_empty() {
            return;
        }
        debug!(cell = self.id(), count = drained.len(), "notifying dependents");
        for dependent in drained.iter().rev() {
            dependent.notified(self);
        }
        assert!(
            self.cell.dependents.borrow().is_empty(),
            "[{}] dependents registered on a terminal cell during notify",
            self.id()
        );
    }

    /// Node-level notify: this handle was blocked on `resolved`, which has
    /// reached a terminal state (or re-suspended, in which case we defer).
    fn notified(&self, resolved: &Handle) {
        let node = self.node();
        let Node::Blocked(queue) = &*node else {
            panic!("[{}] notified a {} cell", self.id(), node.state());
        };

        match resolved.state() {
            State::Waiting => {
                // The dependency re-suspended before delivering a value.
                trace!(cell = self.id(), dependency = resolved.id(), "dependency re-suspended; deferring");
                resolved.add_dependent(self);
            }
            State::Success => {
                let callbacks: ContinuationList = std::mem::take(&mut *queue.borrow_mut());
                if callbacks.is_empty() {
                    // Forwarder: adopt the resolved value unchanged.
                    self.transition(resolved);
                    self.notify();
                    return;
                }

                let resolved_node = resolved.node();
                let Node::Success(values) = &*resolved_node else {
                    unreachable!("state checked above");
                };
                trace!(cell = self.id(), count = callbacks.len(), "invoking continuations");
                let results: Vec<Handle> =
                    callbacks.into_iter().map(|k| k(values.as_ref())).collect();
                let merged = aggregate::merge_all(results);
                self.settle(&merged);
            }
            State::Failure => {
                // Short-circuit: the continuations never run.
                queue.borrow_mut().clear();
                let resolved_node = resolved.node();
                let Node::Failure(error) = &*resolved_node else {
                    unreachable!("state checked above");
                };
                trace!(cell = self.id(), dependency = resolved.id(), "dependency failed; short-circuiting");
                let failed = Handle::new(Node::failure(*error));
                self.transition(&failed);
                self.notify();
            }
            State::Blocked => {
                panic!(
                    "[{}] notified with blocked cell [{}]",
                    self.id(),
                    resolved.id()
                );
            }
        }
    }

    /// Resolves this cell on `result`: adopts it when terminal, otherwise
    /// re-blocks on it as a forwarder so the eventual resolution reaches
    /// this cell. Pending nodes are never aliased.
    pub(crate) fn settle(&self, result: &Handle) {
        if result.state().is_terminal() {
            self.transition(result);
            self.notify();
        } else {
            trace!(cell = self.id(), pending = result.id(), "result still pending; re-blocking");
            *self.cell.node.borrow_mut() = Rc::new(Node::forwarder());
            result.add_dependent(self);
        }
    }

    /// Resumes a Waiting cell with a ready descriptor.
    ///
    /// The resume continuation runs at most once; any other node kind here
    /// is a contract breach.
    pub(crate) fn process(&self, fd: RawFd) {
        let node = self.node();
        let resume = match &*node {
            Node::Waiting(slot) => slot
                .borrow_mut()
                .take()
                .unwrap_or_else(|| panic!("[{}] waiting cell resumed twice", self.id())),
            other => panic!(
                "[{}] processing descriptor {fd} event in {} state",
                self.id(),
                other.state()
            ),
        };
        debug!(cell = self.id(), fd, "resuming");
        let result = resume(fd);
        self.settle(&result);
    }

    /// Tears down a Waiting cell without running its resume continuation,
    /// resolving it to the cancellation sentinel.
    pub(crate) fn cancel(&self) {
        let node = self.node();
        match &*node {
            Node::Waiting(slot) => {
                drop(slot.borrow_mut().take());
                debug!(cell = self.id(), "cancelled");
                let failed = Handle::new(Node::failure(Error::Cancelled));
                self.transition(&failed);
                self.notify();
            }
            other => panic!("[{}] attempted to cancel a {} value", self.id(), other.state()),
        }
    }
}
