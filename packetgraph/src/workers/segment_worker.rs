//! Segment worker: drives a compiled [`Segment`]'s burst loop against a lane set (§4.3, §4.4).

use crate::segment::{Segment, SegmentKind};
use crate::workers::{WorkerBody, WorkerHandle};

/// Runs one segment's scalar or vector dispatch, repeatedly, against a fixed lane set.
///
/// The lane set is the scheduler's `inIndex[]`: which of the segment's input ring lanes this
/// worker instance (or clone) is responsible for this tick. A segment built as
/// [`SegmentKind::Universal`] (no node has committed it either way — e.g. it has exactly one
/// terminator and nothing else) runs the scalar loop, which is a strict subset of what the vector
/// loop would do for the same tree.
pub struct SegmentWorker {
    segment: Segment,
    lanes: Vec<usize>,
    clonable: bool,
}

impl SegmentWorker {
    pub fn new(segment: Segment, lanes: Vec<usize>, clonable: bool) -> Self {
        SegmentWorker { segment, lanes, clonable }
    }
}

impl WorkerBody for SegmentWorker {
    fn name(&self) -> &str {
        "segment"
    }

    fn tick(&mut self, handle: &WorkerHandle) {
        match self.segment.kind() {
            SegmentKind::Vector => self.segment.run_vector(&self.lanes, handle.driver.as_ref(), &handle.stop_ring),
            SegmentKind::Scalar | SegmentKind::Universal => {
                self.segment.run_scalar(&self.lanes, handle.driver.as_ref(), &handle.stop_ring)
            }
        }
    }

    fn clonable(&self) -> bool {
        self.clonable
    }

    fn clone_body(&self) -> Box<dyn WorkerBody> {
        Box::new(SegmentWorker {
            segment: self.segment.clone_for_worker(),
            lanes: self.lanes.clone(),
            clonable: self.clonable,
        })
    }
}
