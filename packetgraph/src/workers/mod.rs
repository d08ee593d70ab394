//! Per-core worker bodies (§4.6, §4.7) and the common handshake harness that drives them (§4.8).
//!
//! Every worker shares one control-flow shape: check the stopper channel, do one burst's worth of
//! work, optionally busy-wait for the pause interval. [`WorkerBody::tick`] supplies the "one
//! burst's worth of work" half; [`crate::scheduler`] supplies the handshake loop around it.

pub mod copier;
pub mod file_io;
pub mod generate;
pub mod kni;
pub mod receive;
pub mod segment_worker;
pub mod send;
pub mod stop;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use crate::driver::{NicDriver, PacketPool, PortId};
use crate::ring::{Rings, StopRing};
use crate::segment::Segment;
use generate::{ScalarGeneratorFn, VectorGeneratorFn};

/// Shared, read-only handles every worker body needs, plus the pause interval the scheduler most
/// recently set for this worker.
#[derive(Clone)]
pub struct WorkerHandle {
    pub driver: Arc<dyn NicDriver>,
    pub pool: Arc<dyn PacketPool>,
    pub stop_ring: Arc<StopRing>,
    /// Nanoseconds to busy-wait after this tick, as last set by the scheduler (§4.8, §9).
    pub pause_ns: u64,
}

/// One worker's unit of repeated work. Implementors do exactly one burst of I/O per `tick` call;
/// the handshake loop in [`crate::scheduler::run_worker`] takes care of pausing, cloning, and
/// termination around it.
pub trait WorkerBody: Send {
    /// A short, human-readable name used in log lines and panics.
    fn name(&self) -> &str;

    /// Performs one burst's worth of work.
    fn tick(&mut self, handle: &WorkerHandle);

    /// Called once, just before the worker thread exits, after a terminate message. The default
    /// does nothing; bodies owning contexts that need explicit release (none do today, since
    /// `Drop` already handles it) can override this.
    fn on_retire(&mut self) {}

    /// Whether the scheduler may create additional clones of this worker (§4.5, §5). Segment
    /// workers whose segment was built under `Configuration::restricted_cloning` return `false`.
    fn clonable(&self) -> bool {
        false
    }

    /// Produces an independent clone for the scheduler to spin up as a new worker. Only called
    /// when `clonable()` is `true`.
    fn clone_body(&self) -> Box<dyn WorkerBody> {
        panic!("{} is not clonable", self.name());
    }
}

/// What fast-generator logic a [`WorkerSpec::FastGenerate`] carries — scalar (per-packet) or
/// vector (whole-burst) generation, mirroring [`crate::segment::NodeLogic`]'s split.
pub enum FastGeneratorSpec {
    Scalar(ScalarGeneratorFn),
    Vector(VectorGeneratorFn),
}

/// A fully-described, not-yet-spawned worker. The graph builder accumulates these;
/// [`crate::lifecycle::System::start`] resolves every `Rc<RefCell<Rings>>` indirection to its
/// final value (build phase is over, so nothing will mutate it again) and spawns one OS thread
/// per spec via [`crate::scheduler::Scheduler`].
pub enum WorkerSpec {
    Receive { port: PortId, output: Rc<RefCell<Rings>> },
    Send { port: PortId, queue: u32, input: Rings },
    Generate { generate: ScalarGeneratorFn, output: Rc<RefCell<Rings>> },
    FastGenerate { spec: FastGeneratorSpec, output: Rc<RefCell<Rings>> },
    Segment { segment: Rc<RefCell<Segment>>, clonable: bool },
    Copy { input: Rings, primary: Rc<RefCell<Rings>>, duplicate: Rc<RefCell<Rings>> },
    Drain { input: Rings },
    Stop,
    FileReader { path: PathBuf, repeat: u32, output: Rc<RefCell<Rings>> },
    FileWriter { path: PathBuf, input: Rings },
    KernelBridge { port: PortId, core: usize },
}

/// The sink worker for `set_stopper`/`set_sender_kni`'s ring-drain half: takes whatever arrives
/// and hands it straight to the stop ring for release. Not installed for KNI binding itself (see
/// [`kni::KernelBridgeWorker`]) — only for the packets a KNI sender consumes.
pub struct DrainWorker {
    input: Rings,
    scratch: Vec<crate::driver::MbufHandle>,
}

impl DrainWorker {
    pub fn new(input: Rings) -> Self {
        DrainWorker { input, scratch: Vec::with_capacity(crate::config::BURST_SIZE) }
    }
}

impl WorkerBody for DrainWorker {
    fn name(&self) -> &str {
        "drain"
    }

    fn tick(&mut self, handle: &WorkerHandle) {
        for lane in 0..self.input.lane_count() {
            self.scratch.clear();
            let moved = self.input.lane(lane).dequeue_burst(crate::config::BURST_SIZE, &mut self.scratch);
            if moved > 0 {
                handle.stop_ring.enqueue_burst(&self.scratch);
            }
        }
    }
}
