//! `Flow`: the builder-side handle for one unattached graph output (§3).
//!
//! A flow is ephemeral and single-use. It starts out `Materialized` (pointing at a concrete
//! ring-producing source), becomes `InSegment` once a node is attached to it, and is consumed
//! exactly once by a sink, at which point it becomes `Closed`. Using a flow after it closes, or
//! using one that was never materialized, is a caller mistake reported as a [`BuildError`].

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{BuildError, BuildResult};
use crate::ring::Rings;
use crate::segment::Segment;

/// Shared counter of currently-open flows. `Start` refuses to run while this is non-zero (§3,
/// invariant 4 of §8).
#[derive(Clone, Default)]
pub struct OpenFlowCounter(Arc<AtomicUsize>);

impl OpenFlowCounter {
    pub fn new() -> Self {
        OpenFlowCounter(Arc::new(AtomicUsize::new(0)))
    }

    fn open(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }

    /// Current number of flows that have been materialized but not yet closed by a sink.
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) enum FlowState {
    /// Points at a source's output ring, behind the `Rc<RefCell<_>>` indirection a merger needs to
    /// redirect it in place (see [`crate::dataflow::builder::Graph::set_merger`]).
    Materialized(Rc<RefCell<Rings>>),
    /// Embedded in a segment-under-construction; `node_index` names the terminator placeholder
    /// that the next attached node will take over.
    InSegment { segment: Rc<RefCell<Segment>>, node_index: usize },
    /// Already consumed by a sink.
    Closed,
}

/// A single unattached graph output. See the module docs.
pub struct Flow {
    pub(crate) state: FlowState,
    pub(crate) counter: OpenFlowCounter,
}

impl Flow {
    pub(crate) fn materialized(rings: Rc<RefCell<Rings>>, counter: OpenFlowCounter) -> Self {
        counter.open();
        Flow { state: FlowState::Materialized(rings), counter }
    }

    pub(crate) fn in_segment(segment: Rc<RefCell<Segment>>, node_index: usize, counter: OpenFlowCounter) -> Self {
        counter.open();
        Flow { state: FlowState::InSegment { segment, node_index }, counter }
    }

    /// Whether this flow has already been consumed by a sink.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, FlowState::Closed)
    }

    /// Marks the flow closed and decrements the open-flow counter. Returns an error if it was
    /// already closed.
    pub(crate) fn close(&mut self) -> BuildResult<FlowState> {
        if matches!(self.state, FlowState::Closed) {
            return Err(BuildError::FlowUsedAfterClose);
        }
        self.counter.close();
        Ok(std::mem::replace(&mut self.state, FlowState::Closed))
    }
}

impl Drop for Flow {
    fn drop(&mut self) {
        // A flow dropped without reaching a sink stays counted as open; `Start` will catch it.
        // We deliberately do not decrement here — the counter tracks "ever materialized, not yet
        // closed", and a leaked handle is exactly the bug invariant 4 exists to catch.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_counter_starts_at_zero() {
        let counter = OpenFlowCounter::new();
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn materializing_and_closing_balances_the_counter() {
        let counter = OpenFlowCounter::new();
        let rings = Rc::new(RefCell::new(Rings::new(1, 64)));
        let mut flow = Flow::materialized(rings, counter.clone());
        assert_eq!(counter.count(), 1);
        flow.close().unwrap();
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn closing_twice_is_an_error() {
        let counter = OpenFlowCounter::new();
        let rings = Rc::new(RefCell::new(Rings::new(1, 64)));
        let mut flow = Flow::materialized(rings, counter);
        flow.close().unwrap();
        assert_eq!(flow.close().unwrap_err(), BuildError::FlowUsedAfterClose);
    }
}
