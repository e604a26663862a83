//! Merging the results of several continuations queued on one Blocked node.
//!
//! # Merge policy
//!
//! Results are sequenced in queue order and folded pairwise:
//!
//! - the earliest Failure in queue order wins;
//! - otherwise the last result's value is the merged value;
//! - a still-pending operand defers the fold by re-blocking on it.
//!
//! Every continuation always runs; the policy only selects which result the
//! merged handle carries. The fold is expressed in the core's own
//! suspension machinery (a Blocked node per pending operand), so there is
//! no second resolution mechanism to keep consistent.

use smallvec::smallvec;

use super::cell::Handle;
use super::node::{Continuation, Node, State};

/// Folds continuation results into one handle. Exactly one result is the
/// identity case and returns it unchanged.
pub(crate) fn merge_all(results: Vec<Handle>) -> Handle {
    let mut results = results.into_iter();
    let first = results
        .next()
        .expect("a blocked cell produced no continuation results");
    results.fold(first, merge)
}

/// Sequences two results: `first`'s failure wins, otherwise the merged
/// value is `second`'s.
fn merge(first: Handle, second: Handle) -> Handle {
    match first.state() {
        State::Failure => first,
        State::Success => second,
        State::Waiting | State::Blocked => {
            let forward: Continuation = Box::new(move |_values| second);
            let merged = Handle::new(Node::blocked(smallvec![forward]));
            first.add_dependent(&merged);
            merged
        }
    }
}
