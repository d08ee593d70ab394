//! `Init → StartPortsAndMemory → Start → Stop → Reset` ordering (§3, §5, §6).
//!
//! [`crate::dataflow::Graph`] is the `Init` phase: a [`Graph`](crate::dataflow::Graph) accumulates
//! worker specs and hands out `Flow`s with no thread ever spawned. [`Graph::start`] is
//! `StartPortsAndMemory` immediately followed by `Start`: it resolves every deferred ring binding,
//! books hardware offloads, and spawns one thread per worker through a [`Scheduler`]. The returned
//! [`System`] *is* the running computation; dropping it (after [`System::run`] returns) is `Reset` —
//! every `Rings`, `Segment`, and context it owned is freed by ordinary `Drop`, since nothing in this
//! crate frees those objects by hand while the runtime is live (§3's lifecycle invariants).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Configuration;
use crate::driver::{NicDriver, PacketPool};
use crate::error::BuildResult;
use crate::ports::PortTable;
use crate::scheduler::Scheduler;
use crate::timers::TimerSet;
use crate::workers::copier::CopierWorker;
use crate::workers::file_io::{FileReaderWorker, FileWriterWorker};
use crate::workers::generate::{FastGenerateWorker, FixedGenerateWorker};
use crate::workers::kni::KernelBridgeWorker;
use crate::workers::receive::ReceiveWorker;
use crate::workers::segment_worker::SegmentWorker;
use crate::workers::send::SendWorker;
use crate::workers::stop::StopWorker;
use crate::workers::{DrainWorker, FastGeneratorSpec, WorkerBody, WorkerHandle, WorkerSpec};

/// A handle another thread can use to ask a running [`System`] to shut down (e.g. from a signal
/// handler). Requesting stop does not block; [`System::run`] notices it on its own tick.
#[derive(Clone)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    /// Asks the owning [`System::run`] loop to return after its current tick.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// The running computation: every worker thread spawned, plus the control loop that ticks timers
/// and watches for a stop request (§4.9, §5).
pub struct System {
    scheduler: Scheduler,
    timers: TimerSet,
    ports: PortTable,
    driver: Arc<dyn NicDriver>,
    tick_period: Duration,
    stop_requested: Arc<AtomicBool>,
}

impl System {
    /// Resolves every deferred ring binding in `pending`, books hardware offloads on every touched
    /// port, and spawns one worker thread per spec. Called by [`crate::dataflow::Graph::start`],
    /// never directly.
    pub(crate) fn start(
        driver: Arc<dyn NicDriver>,
        pool: Arc<dyn PacketPool>,
        config: Configuration,
        ports: PortTable,
        pending: Vec<WorkerSpec>,
        timers: TimerSet,
    ) -> BuildResult<System> {
        if config.hw_tx_checksum {
            for record in ports.touched() {
                if !driver.enable_hw_tx_checksum(record.port) {
                    log::warn!("port {} does not support hardware TX checksum offload", record.port.0);
                }
            }
        }

        let stop_ring_capacity = config.ring_capacity() * config.max_in_index.max(1) as usize;
        let mut scheduler = Scheduler::new(stop_ring_capacity);

        let base_handle = WorkerHandle {
            driver: driver.clone(),
            pool: pool.clone(),
            stop_ring: scheduler.stop_ring().clone(),
            pause_ns: 0,
        };

        scheduler.spawn("stop", base_handle.clone(), Box::new(StopWorker::new()))?;

        for (index, spec) in pending.into_iter().enumerate() {
            let (name, body): (String, Box<dyn WorkerBody>) = match spec {
                WorkerSpec::Receive { port, output } => (
                    format!("receive-{}-{index}", port.0),
                    Box::new(ReceiveWorker::new(port, output.borrow().clone())),
                ),
                WorkerSpec::Send { port, queue, input } => (
                    format!("send-{}-{queue}-{index}", port.0),
                    Box::new(SendWorker::new(port, queue, input)),
                ),
                WorkerSpec::Generate { generate, output } => (
                    format!("generate-{index}"),
                    Box::new(FixedGenerateWorker::new(generate, output.borrow().clone())),
                ),
                WorkerSpec::FastGenerate { spec, output } => {
                    let rings = output.borrow().clone();
                    let body: Box<dyn WorkerBody> = match spec {
                        FastGeneratorSpec::Scalar(generate) => Box::new(FastGenerateWorker::scalar(generate, rings, 0)),
                        FastGeneratorSpec::Vector(generate) => Box::new(FastGenerateWorker::vector(generate, rings, 0)),
                    };
                    (format!("fast-generate-{index}"), body)
                }
                WorkerSpec::Segment { segment, clonable } => {
                    let owned = segment.borrow().clone_for_worker();
                    let lanes: Vec<usize> = (0..owned.input().lane_count()).collect();
                    (format!("segment-{index}"), Box::new(SegmentWorker::new(owned, lanes, clonable)))
                }
                WorkerSpec::Copy { input, primary, duplicate } => (
                    format!("copier-{index}"),
                    Box::new(CopierWorker::new(input, primary.borrow().clone(), duplicate.borrow().clone())),
                ),
                WorkerSpec::Drain { input } => (format!("drain-{index}"), Box::new(DrainWorker::new(input))),
                WorkerSpec::Stop => (format!("stop-{index}"), Box::new(StopWorker::new())),
                WorkerSpec::FileReader { path, repeat, output } => {
                    let worker = FileReaderWorker::open(path, repeat, output.borrow().clone()).map_err(|e| {
                        crate::error::BuildError::BadArgument(format!("opening pcap file reader: {e}"))
                    })?;
                    (format!("file-reader-{index}"), Box::new(worker))
                }
                WorkerSpec::FileWriter { path, input } => {
                    let worker = FileWriterWorker::create(path, input).map_err(|e| {
                        crate::error::BuildError::BadArgument(format!("creating pcap file writer: {e}"))
                    })?;
                    (format!("file-writer-{index}"), Box::new(worker))
                }
                WorkerSpec::KernelBridge { port, core } => {
                    (format!("kernel-bridge-{}-{index}", port.0), Box::new(KernelBridgeWorker::new(port, core)))
                }
            };
            scheduler.spawn(name, base_handle.clone(), body)?;
        }

        Ok(System {
            scheduler,
            timers,
            ports,
            driver,
            tick_period: Duration::from_millis(config.sched_time_ms.max(1)),
            stop_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A token another thread can use to request shutdown.
    pub fn stop_token(&self) -> StopToken {
        StopToken(self.stop_requested.clone())
    }

    /// The port table assembled during graph build, read-only at run time (§5).
    pub fn ports(&self) -> &PortTable {
        &self.ports
    }

    /// Number of worker threads currently spawned, including the stop worker.
    pub fn worker_count(&self) -> usize {
        self.scheduler.workers().len()
    }

    /// `SystemStart`'s blocking half: ticks every registered timer at the scheduler's tick
    /// granularity and watches for a stop request, then performs `SystemStop` (awaiting every
    /// worker's terminate acknowledgement and releasing driver resources) before returning (§5, §6).
    pub fn run(mut self) {
        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(self.tick_period);
            self.timers.tick();
        }
        self.stop();
    }

    /// `SystemStop`: terminates every worker (awaiting each acknowledgement) and releases the
    /// driver's resources. Called automatically at the end of [`System::run`]; exposed separately
    /// for callers (and tests) that drive the computation without blocking on `run`.
    pub fn stop(mut self) {
        self.scheduler.terminate_all();
        drop(self.driver);
    }
}

/// The default error handler (§6): logs the error and terminates the process with a non-zero exit
/// status. A caller that wants to recover from build-time errors should match on
/// [`crate::error::BuildError`] directly instead of calling this.
pub fn default_error_handler(err: &dyn std::error::Error) -> ! {
    log::error!("fatal: {err}");
    std::process::exit(1);
}
