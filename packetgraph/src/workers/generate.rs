//! Generate workers: fixed (non-clonable, one packet at a time) and fast (clonable, rate-targeted,
//! whole-burst) packet sources (§4.6).

use std::sync::Arc;

use crate::config::BURST_SIZE;
use crate::driver::MbufHandle;
use crate::ring::{safe_enqueue, Rings};
use crate::workers::{WorkerBody, WorkerHandle};

/// Produces the bytes for one generated packet. `Fn`, not `FnMut`: any per-instance counter or
/// payload state belongs behind interior mutability the user owns, the same way a segment node's
/// mutable state lives in its [`crate::context::CloneableContext`] rather than the callable
/// itself — this is what lets a fast generator's callable be shared, unmodified, across clones.
pub type ScalarGeneratorFn = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;
/// Produces the bytes for `count` generated packets in one call (vector-mode generation).
pub type VectorGeneratorFn = Arc<dyn Fn(usize) -> Vec<Vec<u8>> + Send + Sync>;

/// The non-clonable fixed generator: one packet allocated and enqueued per tick.
pub struct FixedGenerateWorker {
    generate: ScalarGeneratorFn,
    output: Rings,
}

impl FixedGenerateWorker {
    pub fn new(generate: ScalarGeneratorFn, output: Rings) -> Self {
        FixedGenerateWorker { generate, output }
    }
}

impl WorkerBody for FixedGenerateWorker {
    fn name(&self) -> &str {
        "generate"
    }

    fn tick(&mut self, handle: &WorkerHandle) {
        let bytes = (self.generate)();
        let mbuf = handle.pool.construct(&bytes);
        safe_enqueue(self.output.lane(0), &[mbuf], &handle.stop_ring, handle.driver.as_ref());
    }
}

#[derive(Clone)]
enum FastGeneratorKind {
    Scalar(ScalarGeneratorFn),
    Vector(VectorGeneratorFn),
}

/// The clonable, rate-targeted fast generator: a whole burst allocated and enqueued per tick, with
/// pacing supplied externally via [`WorkerHandle::pause_ns`] (see the scheduler handshake, §4.8).
///
/// `lane` selects which ring lane this instance (or clone) writes to — each clone the scheduler
/// creates is assigned a distinct lane so their bursts don't interleave within one ring lane.
pub struct FastGenerateWorker {
    kind: FastGeneratorKind,
    output: Rings,
    lane: usize,
    next_lane: Arc<std::sync::atomic::AtomicUsize>,
    scratch: Vec<MbufHandle>,
}

impl FastGenerateWorker {
    pub fn scalar(generate: ScalarGeneratorFn, output: Rings, first_lane: usize) -> Self {
        FastGenerateWorker {
            kind: FastGeneratorKind::Scalar(generate),
            output,
            lane: first_lane,
            next_lane: Arc::new(std::sync::atomic::AtomicUsize::new(first_lane + 1)),
            scratch: Vec::with_capacity(BURST_SIZE),
        }
    }

    pub fn vector(generate: VectorGeneratorFn, output: Rings, first_lane: usize) -> Self {
        FastGenerateWorker {
            kind: FastGeneratorKind::Vector(generate),
            output,
            lane: first_lane,
            next_lane: Arc::new(std::sync::atomic::AtomicUsize::new(first_lane + 1)),
            scratch: Vec::with_capacity(BURST_SIZE),
        }
    }
}

impl WorkerBody for FastGenerateWorker {
    fn name(&self) -> &str {
        "fast-generate"
    }

    fn tick(&mut self, handle: &WorkerHandle) {
        self.scratch.clear();
        match &self.kind {
            FastGeneratorKind::Scalar(generate) => {
                for _ in 0..BURST_SIZE {
                    let bytes = generate();
                    self.scratch.push(handle.pool.construct(&bytes));
                }
            }
            FastGeneratorKind::Vector(generate) => {
                for bytes in generate(BURST_SIZE) {
                    self.scratch.push(handle.pool.construct(&bytes));
                }
            }
        }
        safe_enqueue(self.output.lane(self.lane), &self.scratch, &handle.stop_ring, handle.driver.as_ref());
    }

    fn clonable(&self) -> bool {
        true
    }

    fn clone_body(&self) -> Box<dyn WorkerBody> {
        let lane = self.next_lane.fetch_add(1, std::sync::atomic::Ordering::SeqCst) % self.output.lane_count();
        Box::new(FastGenerateWorker {
            kind: self.kind.clone(),
            output: self.output.clone(),
            lane,
            next_lane: self.next_lane.clone(),
            scratch: Vec::with_capacity(BURST_SIZE),
        })
    }
}
