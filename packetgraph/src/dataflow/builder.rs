//! `Graph`: the user-visible builder (§4.2).
//!
//! A `Graph` accumulates [`crate::workers::WorkerSpec`] values and hands out [`Flow`] handles as
//! the caller wires sources through segments to sinks. Nothing runs until [`Graph::start`]
//! consumes the builder and spawns one thread per worker spec through a [`Scheduler`] — building
//! is strictly single-threaded, so every `Rc<RefCell<_>>` indirection here needs no synchronization
//! of its own (§5).

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use smallvec::SmallVec;

use crate::config::{Configuration, BURST_SIZE};
use crate::context::CloneableContext;
use crate::dataflow::flow::{Flow, FlowState, OpenFlowCounter};
use crate::driver::{NicDriver, PacketPool, PortId};
use crate::error::{BuildError, BuildResult};
use crate::partition::{self, PartitionContext};
use crate::ports::PortTable;
use crate::ring::Rings;
use crate::segment::{Following, NodeKind, NodeLogic, ScalarFn, Segment, VectorFn};
use crate::timers::{Timer, TimerSet};
use crate::workers::generate::{ScalarGeneratorFn, VectorGeneratorFn};
use crate::workers::{FastGeneratorSpec, WorkerSpec};

/// The builder-side handle for a graph under construction. Exists from `Init` through `Start`
/// (§3's lifecycle invariants); [`Graph::start`] is the `Init → Start` transition.
pub struct Graph {
    driver: Arc<dyn NicDriver>,
    pool: Arc<dyn PacketPool>,
    config: Configuration,
    ports: PortTable,
    counter: OpenFlowCounter,
    pending_workers: Vec<WorkerSpec>,
    timers: TimerSet,
}

impl Graph {
    /// Opens a new, empty graph against `driver`/`pool`, per `config`.
    pub fn new(driver: Arc<dyn NicDriver>, pool: Arc<dyn PacketPool>, mut config: Configuration) -> Self {
        if config.disable_scheduler {
            config.max_in_index = 1;
        }
        let ports = PortTable::new(driver.as_ref(), config.max_in_index);
        Graph {
            driver,
            pool,
            config,
            ports,
            counter: OpenFlowCounter::new(),
            pending_workers: Vec::new(),
            timers: TimerSet::new(),
        }
    }

    /// Number of flows materialized but not yet closed. `Start` refuses to run while this is
    /// nonzero (§3, invariant 4 of §8).
    pub fn open_flow_count(&self) -> usize {
        self.counter.count()
    }

    fn register_segment_once(&mut self, segment: &Rc<RefCell<Segment>>) {
        if !segment.borrow().is_registered() {
            segment.borrow().mark_registered();
            self.pending_workers.push(WorkerSpec::Segment {
                segment: segment.clone(),
                clonable: !self.config.restricted_cloning,
            });
        }
    }

    /// Closes `flow`, returning the concrete `Rings` it now feeds. If the flow was embedded in a
    /// segment, this registers that segment's worker (if not already registered) and returns the
    /// output ring its terminator placeholder already points at (§4.2's `finish`).
    fn finish(&mut self, mut flow: Flow) -> BuildResult<Rings> {
        let state = flow.close()?;
        match state {
            FlowState::Materialized(rc) => Ok(rc.borrow().clone()),
            FlowState::InSegment { segment, node_index } => {
                self.register_segment_once(&segment);
                let out_idx = segment
                    .borrow()
                    .terminator_output(node_index)
                    .expect("a Flow::InSegment always names a terminator placeholder");
                let rings = segment.borrow().outputs()[out_idx].clone();
                Ok(rings)
            }
            FlowState::Closed => unreachable!("Flow::close already rejects an already-closed flow"),
        }
    }

    /// Allocates `n` fresh terminator placeholders on `segment`, each with its own output ring
    /// sized to the segment's input width, returning their node indices. Every branch slot — the
    /// fall-through included — starts out pointing at one of these; attaching a further node later
    /// overwrites the slot in place via [`Segment::replace_node`] (§4.2, §9).
    fn alloc_terminators(segment: &Rc<RefCell<Segment>>, n: usize, ring_capacity: usize) -> SmallVec<[usize; 8]> {
        let lane_count = segment.borrow().input().lane_count();
        (0..n)
            .map(|_| {
                let rings = Rings::new(lane_count, ring_capacity);
                let mut seg = segment.borrow_mut();
                let out_idx = seg.add_output(rings);
                seg.add_terminator(out_idx)
            })
            .collect()
    }

    fn following_for(children: &SmallVec<[usize; 8]>) -> Following {
        if children.len() == 1 {
            Following::Linear(children[0])
        } else {
            Following::Branch(children.iter().copied().collect())
        }
    }

    /// The fusion rule (§4.2's `segmentInsert`): attaches one node with `n_children` outgoing
    /// slots to `flow`, returning one new [`Flow`] per slot. Handles all three cases: `flow` was
    /// materialized (opens a fresh segment), `flow` was in-segment and compatible (replaces the
    /// terminator placeholder in place), or `flow` was in-segment but the node's dispatch kind
    /// conflicts with the segment's commitment (closes the segment at a bridge ring and opens a
    /// new one, per the scalar/vector fusion rule).
    fn attach(
        &mut self,
        mut flow: Flow,
        node_kind: NodeKind,
        logic: NodeLogic,
        context: Option<Box<dyn CloneableContext>>,
        n_children: usize,
    ) -> BuildResult<Vec<Flow>> {
        assert!(n_children >= 1, "a non-terminator node always has at least one following slot");
        let counter = flow.counter.clone();
        let cap = self.config.ring_capacity();
        let state = flow.close()?;

        let segment = match state {
            FlowState::Materialized(rc) => {
                let rings = rc.borrow().clone();
                Rc::new(RefCell::new(Segment::new(rings)))
            }
            FlowState::InSegment { segment, node_index } => {
                let compatible = segment.borrow().kind().combine(node_kind).is_some();
                if compatible {
                    let children = Self::alloc_terminators(&segment, n_children, cap);
                    let following = Self::following_for(&children);
                    segment
                        .borrow_mut()
                        .replace_node(node_index, Some(logic.clone()), following, context.as_ref().map(|c| c.clone_box()))
                        .expect("kind compatibility was just checked");
                    return Ok(children
                        .into_iter()
                        .map(|ci| Flow::in_segment(segment.clone(), ci, counter.clone()))
                        .collect());
                }
                // Scalar/vector fusion conflict: close the current segment at this branch point
                // (its terminator placeholder already owns an output ring — reuse it as the bridge)
                // and open a fresh segment reading from that ring.
                self.register_segment_once(&segment);
                let out_idx = segment
                    .borrow()
                    .terminator_output(node_index)
                    .expect("a Flow::InSegment always names a terminator placeholder");
                let bridge = segment.borrow().outputs()[out_idx].clone();
                Rc::new(RefCell::new(Segment::new(bridge)))
            }
            FlowState::Closed => unreachable!("Flow::close already rejects an already-closed flow"),
        };

        let children = Self::alloc_terminators(&segment, n_children, cap);
        let following = Self::following_for(&children);
        let idx = segment
            .borrow_mut()
            .try_add_node(Some(logic), following, context)
            .expect("a freshly opened segment is Universal and accepts any node kind");
        segment.borrow_mut().set_root(idx);
        Ok(children.into_iter().map(|ci| Flow::in_segment(segment.clone(), ci, counter.clone())).collect())
    }

    // ---- sources ----

    /// `SetReceiver`: attaches a receive worker to `port`, materializing a fresh `Rings` sized to
    /// that port's capped RSS lane count.
    pub fn set_receiver(&mut self, port: u16) -> BuildResult<Flow> {
        let port_id = PortId(port);
        let in_index = self.ports.register_receive(self.driver.as_ref(), port_id)?;
        let rings = Rings::new(in_index as usize, self.config.ring_capacity());
        let rc = Rc::new(RefCell::new(rings));
        self.pending_workers.push(WorkerSpec::Receive { port: port_id, output: rc.clone() });
        Ok(Flow::materialized(rc, self.counter.clone()))
    }

    /// `SetGenerator`: the non-clonable, fixed-rate generator (§4.6).
    pub fn set_generator(&mut self, generate: ScalarGeneratorFn) -> Flow {
        let rings = Rings::new(1, self.config.ring_capacity());
        let rc = Rc::new(RefCell::new(rings));
        self.pending_workers.push(WorkerSpec::Generate { generate, output: rc.clone() });
        Flow::materialized(rc, self.counter.clone())
    }

    fn check_generator_rate(&self, target_speed: u64) -> BuildResult<()> {
        if target_speed == 0 {
            return Err(BuildError::BadArgument("fast generator target speed must be positive".into()));
        }
        let achievable = (target_speed as u128 * self.config.sched_time_ms as u128) / 1000;
        if achievable < BURST_SIZE as u128 {
            return Err(BuildError::BadArgument(format!(
                "target speed {target_speed} pps is too low for the scheduler to control at a {}ms tick \
                 (needs at least {} pps)",
                self.config.sched_time_ms,
                (BURST_SIZE as u128 * 1000 + self.config.sched_time_ms as u128 - 1) / self.config.sched_time_ms as u128
            )));
        }
        Ok(())
    }

    /// `SetFastGenerator`: the clonable, rate-targeted scalar generator (§4.6). `target_speed` is
    /// in packets per second and is only validated against the scheduler's tick granularity here;
    /// translating it into an actual pause value is the scheduler's job.
    pub fn set_fast_generator(&mut self, generate: ScalarGeneratorFn, target_speed: u64) -> BuildResult<Flow> {
        self.check_generator_rate(target_speed)?;
        let lane_count = self.config.max_in_index.max(1) as usize;
        let rc = Rc::new(RefCell::new(Rings::new(lane_count, self.config.ring_capacity())));
        self.pending_workers
            .push(WorkerSpec::FastGenerate { spec: FastGeneratorSpec::Scalar(generate), output: rc.clone() });
        Ok(Flow::materialized(rc, self.counter.clone()))
    }

    /// `SetFastGenerator`, vector variant: the callable produces a whole burst's worth of packets
    /// per call instead of one at a time.
    pub fn set_vector_fast_generator(&mut self, generate: VectorGeneratorFn, target_speed: u64) -> BuildResult<Flow> {
        self.check_generator_rate(target_speed)?;
        let lane_count = self.config.max_in_index.max(1) as usize;
        let rc = Rc::new(RefCell::new(Rings::new(lane_count, self.config.ring_capacity())));
        self.pending_workers
            .push(WorkerSpec::FastGenerate { spec: FastGeneratorSpec::Vector(generate), output: rc.clone() });
        Ok(Flow::materialized(rc, self.counter.clone()))
    }

    /// `SetReceiverFile`: reads a pcap file, repeating it `repeat` times before the worker falls
    /// idle (§4.7).
    pub fn set_receiver_file(&mut self, path: impl Into<PathBuf>, repeat: u32) -> BuildResult<Flow> {
        if repeat == 0 {
            return Err(BuildError::BadArgument("file reader repeat count must be at least 1".into()));
        }
        let rc = Rc::new(RefCell::new(Rings::new(1, self.config.ring_capacity())));
        self.pending_workers.push(WorkerSpec::FileReader { path: path.into(), repeat, output: rc.clone() });
        Ok(Flow::materialized(rc, self.counter.clone()))
    }

    // ---- sinks ----

    /// `SetSender`: books a TX queue on `port` and drains `flow` onto it.
    pub fn set_sender(&mut self, flow: Flow, port: u16) -> BuildResult<()> {
        let port_id = PortId(port);
        let queue = self.ports.reserve_tx_queue(self.driver.as_ref(), port_id)?;
        let input = self.finish(flow)?;
        self.pending_workers.push(WorkerSpec::Send { port: port_id, queue, input });
        Ok(())
    }

    /// `SetSenderFile`: drains `flow` into a freshly created pcap file at `path`.
    pub fn set_sender_file(&mut self, flow: Flow, path: impl Into<PathBuf>) -> BuildResult<()> {
        let input = self.finish(flow)?;
        self.pending_workers.push(WorkerSpec::FileWriter { path: path.into(), input });
        Ok(())
    }

    /// `SetSenderKNI`: binds `port` to a kernel-bridge tap pinned to `core`, and drains `flow`
    /// into the driver's release path (the kernel-bridge device itself is the one that hands
    /// packets to the host kernel; this crate only owns the ring feeding it, per §4.7).
    pub fn set_sender_kni(&mut self, flow: Flow, port: u16, core: usize) -> BuildResult<()> {
        let port_id = PortId(port);
        self.ports.register_kernel_bridge(self.driver.as_ref(), port_id, core)?;
        let input = self.finish(flow)?;
        self.pending_workers.push(WorkerSpec::KernelBridge { port: port_id, core });
        self.pending_workers.push(WorkerSpec::Drain { input });
        Ok(())
    }

    /// `SetStopper`: drains `flow` straight to the stop ring.
    pub fn set_stopper(&mut self, flow: Flow) -> BuildResult<()> {
        let input = self.finish(flow)?;
        self.pending_workers.push(WorkerSpec::Drain { input });
        Ok(())
    }

    // ---- linear and branching nodes ----

    /// `SetHandler`: a scalar node that always continues to the next stage.
    pub fn set_handler(&mut self, flow: Flow, f: ScalarFn) -> BuildResult<Flow> {
        let mut out = self.attach(flow, NodeKind::Scalar, NodeLogic::Scalar(f), None, 1)?;
        Ok(out.remove(0))
    }

    /// `SetVectorHandler`: the burst-wide counterpart of [`Graph::set_handler`].
    pub fn set_vector_handler(&mut self, flow: Flow, f: VectorFn) -> BuildResult<Flow> {
        let mut out = self.attach(flow, NodeKind::Vector, NodeLogic::Vector(f), None, 1)?;
        Ok(out.remove(0))
    }

    /// `SetHandlerDrop`: like [`Graph::set_handler`], but the callable returns `true` to keep the
    /// packet (continuing the chain) or `false` to drop it (routed straight to the stop ring).
    pub fn set_handler_drop(
        &mut self,
        flow: Flow,
        keep: Arc<dyn Fn(crate::driver::MbufHandle, Option<&mut dyn CloneableContext>) -> bool + Send + Sync>,
    ) -> BuildResult<Flow> {
        let route: ScalarFn = Arc::new(move |mbuf, ctx| if keep(mbuf, ctx) { 0 } else { 1 });
        let mut out = self.attach(flow, NodeKind::Scalar, NodeLogic::Scalar(route), None, 2)?;
        let drop_flow = out.remove(1);
        let keep_flow = out.remove(0);
        let dropped = self.finish(drop_flow)?;
        self.pending_workers.push(WorkerSpec::Drain { input: dropped });
        Ok(keep_flow)
    }

    /// `SetVectorHandlerDrop`: the burst-wide counterpart of [`Graph::set_handler_drop`]; the
    /// callable writes `0` (keep) or `1` (drop) per masked slot of `answers`.
    pub fn set_vector_handler_drop(&mut self, flow: Flow, f: VectorFn) -> BuildResult<Flow> {
        let mut out = self.attach(flow, NodeKind::Vector, NodeLogic::Vector(f), None, 2)?;
        let drop_flow = out.remove(1);
        let keep_flow = out.remove(0);
        let dropped = self.finish(drop_flow)?;
        self.pending_workers.push(WorkerSpec::Drain { input: dropped });
        Ok(keep_flow)
    }

    /// `SetSeparator`: a two-way scalar branch; both branches are handed back to the caller.
    pub fn set_separator(&mut self, flow: Flow, f: ScalarFn) -> BuildResult<(Flow, Flow)> {
        let mut out = self.attach(flow, NodeKind::Scalar, NodeLogic::Scalar(f), None, 2)?;
        let second = out.remove(1);
        let first = out.remove(0);
        Ok((first, second))
    }

    /// `SetVectorSeparator`: the burst-wide counterpart of [`Graph::set_separator`].
    pub fn set_vector_separator(&mut self, flow: Flow, f: VectorFn) -> BuildResult<(Flow, Flow)> {
        let mut out = self.attach(flow, NodeKind::Vector, NodeLogic::Vector(f), None, 2)?;
        let second = out.remove(1);
        let first = out.remove(0);
        Ok((first, second))
    }

    /// `SetSplitter`: an `n`-way scalar branch.
    pub fn set_splitter(&mut self, flow: Flow, f: ScalarFn, n: usize) -> BuildResult<Vec<Flow>> {
        if n < 2 {
            return Err(BuildError::BadArgument("a splitter needs at least two branches".into()));
        }
        self.attach(flow, NodeKind::Scalar, NodeLogic::Scalar(f), None, n)
    }

    /// `SetVectorSplitter`: the burst-wide counterpart of [`Graph::set_splitter`].
    pub fn set_vector_splitter(&mut self, flow: Flow, f: VectorFn, n: usize) -> BuildResult<Vec<Flow>> {
        if n < 2 {
            return Err(BuildError::BadArgument("a splitter needs at least two branches".into()));
        }
        self.attach(flow, NodeKind::Vector, NodeLogic::Vector(f), None, n)
    }

    /// `SetPartitioner`: the built-in alternating N/M branch selector (§4.5). Warns but does not
    /// fail when `n == 0` or `m == 0`, per [`PartitionContext::new`].
    pub fn set_partitioner(&mut self, flow: Flow, n: u32, m: u32) -> BuildResult<(Flow, Flow)> {
        let ctx = PartitionContext::new(n, m);
        let f = partition::scalar_partition_fn();
        let mut out = self.attach(flow, NodeKind::Scalar, NodeLogic::Scalar(f), Some(Box::new(ctx)), 2)?;
        let second = out.remove(1);
        let first = out.remove(0);
        Ok((first, second))
    }

    /// `SetCopier`: duplicates every packet into a second ring (§4.2).
    pub fn set_copier(&mut self, flow: Flow) -> BuildResult<(Flow, Flow)> {
        let counter = flow.counter.clone();
        let input = self.finish(flow)?;
        let cap = self.config.ring_capacity();
        let primary = Rc::new(RefCell::new(Rings::new(input.lane_count(), cap)));
        let duplicate = Rc::new(RefCell::new(Rings::new(input.lane_count(), cap)));
        self.pending_workers.push(WorkerSpec::Copy { input, primary: primary.clone(), duplicate: duplicate.clone() });
        Ok((
            Flow::materialized(primary, counter.clone()),
            Flow::materialized(duplicate, counter),
        ))
    }

    /// `SetMerger`: fans every input in `flows` into one shared ring without inserting a worker of
    /// its own — a materialized input's destination is rewritten in place, and an in-segment
    /// input's terminator is repointed at the merged ring (§4.2, §9's "back-edges during merger").
    pub fn set_merger(&mut self, flows: Vec<Flow>) -> BuildResult<Flow> {
        if flows.is_empty() {
            return Err(BuildError::BadArgument("a merger needs at least one input flow".into()));
        }
        let counter = flows[0].counter.clone();
        let lane_count = flows
            .iter()
            .map(|f| match &f.state {
                FlowState::Materialized(rc) => rc.borrow().lane_count(),
                FlowState::InSegment { segment, .. } => segment.borrow().input().lane_count(),
                FlowState::Closed => 1,
            })
            .max()
            .unwrap_or(1);
        let merged = Rings::new(lane_count, self.config.ring_capacity());

        for mut flow in flows {
            match flow.close()? {
                FlowState::Materialized(rc) => {
                    *rc.borrow_mut() = merged.clone();
                }
                FlowState::InSegment { segment, node_index } => {
                    let out_idx = segment
                        .borrow()
                        .terminator_output(node_index)
                        .expect("a Flow::InSegment always names a terminator placeholder");
                    segment.borrow_mut().set_output(out_idx, merged.clone());
                    self.register_segment_once(&segment);
                }
                FlowState::Closed => unreachable!("Flow::close already rejects an already-closed flow"),
            }
        }

        Ok(Flow::materialized(Rc::new(RefCell::new(merged)), counter))
    }

    // ---- timers ----

    /// Registers a new timer firing every `period`, returning its index for later
    /// [`Graph::stop_timer`] calls (§4.9).
    pub fn add_timer(&mut self, period: Duration) -> usize {
        self.timers.register(Timer::new(period))
    }

    /// Removes a previously registered timer.
    pub fn stop_timer(&mut self, index: usize) {
        self.timers.stop(index);
    }

    /// Attaches a `(context, arm-flag)` variant to `timer` (as returned by [`Graph::add_timer`]):
    /// `handler` fires, and its arm flag clears, on every tick of `timer` where the flag is set
    /// (§4.9). `armed` is the variant's initial arm state; pass `true` for a handler that should
    /// fire on the very next due tick.
    pub fn add_timer_handler(
        &mut self,
        timer: usize,
        armed: bool,
        handler: impl FnMut() + Send + 'static,
    ) -> usize {
        let variant = self.timers.add_variant(timer, Box::new(handler));
        if armed {
            self.timers.arm(timer, variant);
        }
        variant
    }

    /// Re-arms a timer variant so it fires again on its owning timer's next due tick.
    pub fn arm_timer(&mut self, timer: usize, variant: usize) {
        self.timers.arm(timer, variant);
    }

    /// Consumes the graph, spawning one worker thread per accumulated [`WorkerSpec`] and handing
    /// control to a [`crate::lifecycle::System`]. Fails with [`BuildError::OpenFlowAtStart`] if any
    /// flow is still open (§3, §8 invariant 4).
    pub fn start(self) -> BuildResult<crate::lifecycle::System> {
        let open = self.counter.count();
        if open != 0 {
            return Err(BuildError::OpenFlowAtStart(open));
        }
        crate::lifecycle::System::start(self.driver, self.pool, self.config, self.ports, self.pending_workers, self.timers)
    }
}
