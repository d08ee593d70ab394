//! Segments: a fused run of user nodes executed between one input ring and zero-or-more output
//! rings, with a single dequeue and a single enqueue per output per burst (§4.3, §4.4).
//!
//! The callable stored at each [`FuncNode`] is an `Arc<dyn Fn(...) + Send + Sync>` rather than a
//! `Box<dyn FnMut(...)>`: all per-instance mutable state lives in the node's [`CloneableContext`],
//! so the callable itself is reentrant and can be shared, unmodified, across every clone the
//! scheduler creates of this segment. Only the context vector is deep-copied per clone (see
//! [`Segment::clone_for_worker`]).

use smallvec::SmallVec;

use crate::config::BURST_SIZE;
use crate::context::CloneableContext;
use crate::driver::{MbufHandle, NicDriver};
use crate::ring::{safe_enqueue, Rings, StopRing};

/// A scalar callable: one packet in, a branch index out.
pub type ScalarFn = std::sync::Arc<dyn Fn(MbufHandle, Option<&mut dyn CloneableContext>) -> usize + Send + Sync>;

/// A vector callable: a masked burst in, one branch index written per masked slot of `answers`.
pub type VectorFn = std::sync::Arc<
    dyn Fn(&[MbufHandle], u32, &mut [usize; BURST_SIZE], Option<&mut dyn CloneableContext>) + Send + Sync,
>;

/// The logic carried by a non-terminator [`FuncNode`].
#[derive(Clone)]
pub enum NodeLogic {
    /// Only callable from a scalar burst loop.
    Scalar(ScalarFn),
    /// Only callable from a vector burst loop.
    Vector(VectorFn),
    /// Callable from either; does not force the segment to specialize.
    Universal(ScalarFn, VectorFn),
}

/// A node's declared dispatch affinity, used by the fusion rule to decide whether appending it
/// keeps the current segment, promotes it, or forces a split (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Works in either a scalar or a vector segment (includes terminators).
    Universal,
    /// Requires a scalar segment.
    Scalar,
    /// Requires a vector segment.
    Vector,
}

/// What a node does once its branch index is known.
#[derive(Clone)]
pub enum Following {
    /// A slice terminator: routes the packet to the segment's `usize`-th output ring.
    Terminator(usize),
    /// A linear handler: always continues to the node at this index.
    Linear(usize),
    /// A branch node: continues to `children[branch_index]`.
    Branch(SmallVec<[usize; 8]>),
}

impl Following {
    /// The declared "following number" per the data model: 0, 1, or N.
    pub fn following_number(&self) -> usize {
        match self {
            Following::Terminator(_) => 0,
            Following::Linear(_) => 1,
            Following::Branch(children) => children.len(),
        }
    }
}

/// One compiled node inside a [`Segment`]'s Func tree.
#[derive(Clone)]
pub struct FuncNode {
    /// `None` for terminators, which carry no user logic.
    pub logic: Option<NodeLogic>,
    /// Routing: how this node's branch index (if any) selects the next step.
    pub following: Following,
}

impl FuncNode {
    /// The dispatch affinity of this node, used for scalar/vector fusion.
    pub fn kind(&self) -> NodeKind {
        node_kind_of(&self.logic)
    }
}

/// The dispatch affinity a piece of (possibly absent) node logic would carry, without needing to
/// construct a [`FuncNode`] just to ask.
pub fn node_kind_of(logic: &Option<NodeLogic>) -> NodeKind {
    match logic {
        None => NodeKind::Universal,
        Some(NodeLogic::Scalar(_)) => NodeKind::Scalar,
        Some(NodeLogic::Vector(_)) => NodeKind::Vector,
        Some(NodeLogic::Universal(..)) => NodeKind::Universal,
    }
}

/// The dispatch style a segment has committed to. A segment starts `Universal` and specializes
/// on the first non-universal node appended to it (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// No scalar- or vector-only node has been appended yet.
    Universal,
    /// Committed to scalar dispatch.
    Scalar,
    /// Committed to vector dispatch.
    Vector,
}

impl SegmentKind {
    /// Combines the segment's current kind with an incoming node's kind. Returns the resulting
    /// kind, or `None` if the combination requires closing the segment and starting a new one
    /// (a scalar-only node following a vector-committed segment, or vice versa).
    pub fn combine(self, incoming: NodeKind) -> Option<SegmentKind> {
        match (self, incoming) {
            (_, NodeKind::Universal) => Some(self),
            (SegmentKind::Universal, NodeKind::Scalar) => Some(SegmentKind::Scalar),
            (SegmentKind::Universal, NodeKind::Vector) => Some(SegmentKind::Vector),
            (SegmentKind::Scalar, NodeKind::Scalar) => Some(SegmentKind::Scalar),
            (SegmentKind::Vector, NodeKind::Vector) => Some(SegmentKind::Vector),
            (SegmentKind::Scalar, NodeKind::Vector) => None,
            (SegmentKind::Vector, NodeKind::Scalar) => None,
        }
    }
}

/// A fused chain/tree of user callables sharing one input [`Rings`] and zero-or-more output
/// `Rings`, executed one burst at a time (§3, §4.3, §4.4).
pub struct Segment {
    input: Rings,
    outputs: Vec<Rings>,
    nodes: Vec<FuncNode>,
    contexts: Vec<Option<Box<dyn CloneableContext>>>,
    first: usize,
    kind: SegmentKind,
    registered: std::cell::Cell<bool>,
}

impl Segment {
    /// Opens a new, empty, universal segment reading from `input`.
    pub fn new(input: Rings) -> Self {
        Segment {
            input,
            outputs: Vec::new(),
            nodes: Vec::new(),
            contexts: Vec::new(),
            first: 0,
            kind: SegmentKind::Universal,
            registered: std::cell::Cell::new(false),
        }
    }

    /// Whether a worker has already been registered to drive this segment. The graph builder
    /// consults this to avoid registering the same segment twice when more than one of its
    /// branches reaches a sink (§4.2).
    pub fn is_registered(&self) -> bool {
        self.registered.get()
    }

    /// Marks this segment as having a worker registered. Idempotent.
    pub fn mark_registered(&self) {
        self.registered.set(true);
    }

    /// The segment's input edge.
    pub fn input(&self) -> &Rings {
        &self.input
    }

    /// The segment's current dispatch commitment.
    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    /// The index of the root Func node, or `None` if the segment has no nodes yet.
    pub fn first(&self) -> Option<usize> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(self.first)
        }
    }

    /// Declares which node is the tree's root. Nodes are typically appended leaves-first (a
    /// branch's children must already exist to be referenced by [`Following::Branch`]), so the
    /// builder sets the root explicitly once the whole tree is in place.
    pub fn set_root(&mut self, index: usize) {
        assert!(index < self.nodes.len(), "root index out of range");
        self.first = index;
    }

    /// Registers a fresh output ring, returning its index for use in [`Following::Terminator`].
    pub fn add_output(&mut self, rings: Rings) -> usize {
        self.outputs.push(rings);
        self.outputs.len() - 1
    }

    /// Borrows the segment's output edges.
    pub fn outputs(&self) -> &[Rings] {
        &self.outputs
    }

    /// Overwrites an already-registered output edge — used by `set_merger` to redirect a
    /// segment-sourced terminator into a shared merged ring after the fact (§4.2).
    pub fn set_output(&mut self, index: usize, rings: Rings) {
        self.outputs[index] = rings;
    }

    /// Appends a node, wiring it as `following`, with an optional context. If this is the first
    /// node in the segment it becomes the root. Returns the new node's index.
    ///
    /// Returns `Err(())` if `logic`'s [`NodeKind`] is incompatible with the segment's current
    /// [`SegmentKind`] — the caller (the graph builder) is responsible for closing the segment
    /// and opening a fresh one on a bridge ring in that case, per the fusion rule in §4.2.
    pub fn try_add_node(
        &mut self,
        logic: Option<NodeLogic>,
        following: Following,
        context: Option<Box<dyn CloneableContext>>,
    ) -> Result<usize, ()> {
        let new_kind = self.kind.combine(node_kind_of(&logic)).ok_or(())?;
        self.kind = new_kind;

        let index = self.nodes.len();
        self.nodes.push(FuncNode { logic, following });
        self.contexts.push(context);
        Ok(index)
    }

    /// Rewrites an already-appended node's `following`, used when a sibling branch slot that
    /// originally pointed nowhere is later attached to a new node (see the graph builder).
    pub fn set_following(&mut self, node: usize, following: Following) {
        self.nodes[node].following = following;
    }

    /// Appends a fresh terminator node routing into output ring `out_idx`, returning its index.
    /// Used both to close a segment and, by the graph builder, as the placeholder every branch
    /// slot starts out pointing at before a real node is attached there.
    pub fn add_terminator(&mut self, out_idx: usize) -> usize {
        let index = self.nodes.len();
        self.nodes.push(FuncNode { logic: None, following: Following::Terminator(out_idx) });
        self.contexts.push(None);
        index
    }

    /// Replaces the node currently at `index` in place — its old `following` target(s), if they
    /// were terminator placeholders, are simply abandoned (dead nodes, harmless but unreachable).
    /// This is how the builder attaches a user node to a `Flow::InSegment` tail without disturbing
    /// the parent's child-array pointer, which still names `index` (§4.2's `segmentInsert`).
    ///
    /// Fails the same way [`Segment::try_add_node`] does if `logic`'s kind is incompatible with
    /// the segment's current commitment.
    pub fn replace_node(
        &mut self,
        index: usize,
        logic: Option<NodeLogic>,
        following: Following,
        context: Option<Box<dyn CloneableContext>>,
    ) -> Result<(), ()> {
        let new_kind = self.kind.combine(node_kind_of(&logic)).ok_or(())?;
        self.kind = new_kind;

        self.nodes[index] = FuncNode { logic, following };
        self.contexts[index] = context;
        Ok(())
    }

    /// If `index` currently names a terminator, its output-ring index.
    pub fn terminator_output(&self, index: usize) -> Option<usize> {
        match &self.nodes[index].following {
            Following::Terminator(out_idx) => Some(*out_idx),
            _ => None,
        }
    }

    /// Number of nodes currently in the Func tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the segment has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Produces an independent clone of this segment for a new worker instance: callables are
    /// cheaply shared via `Arc::clone`, but every context is deep-copied through
    /// [`CloneableContext::clone_box`] so the clone owns fully independent mutable state (§3, the
    /// partition-context "Copy" requirement; §9, "cloning requires context duplication").
    pub fn clone_for_worker(&self) -> Segment {
        Segment {
            input: self.input.clone(),
            outputs: self.outputs.clone(),
            nodes: self.nodes.clone(),
            contexts: self.contexts.iter().map(|c| c.as_ref().map(|c| c.clone_box())).collect(),
            first: self.first,
            kind: self.kind,
            registered: std::cell::Cell::new(true),
        }
    }

    /// Runs one scalar burst per lane in `lanes` (§4.3).
    pub fn run_scalar(&mut self, lanes: &[usize], driver: &dyn NicDriver, stop_ring: &StopRing) {
        if self.nodes.is_empty() {
            return;
        }
        let mut batch = Vec::with_capacity(BURST_SIZE);
        for &lane in lanes {
            batch.clear();
            let moved = self.input.lane(lane).dequeue_burst(BURST_SIZE, &mut batch);
            if moved == 0 {
                continue;
            }

            let mut out_buffers: Vec<Vec<MbufHandle>> = vec![Vec::new(); self.outputs.len()];

            for &mbuf in &batch {
                let mut node_idx = self.first;
                loop {
                    match self.nodes[node_idx].following.clone() {
                        Following::Terminator(out_idx) => {
                            out_buffers[out_idx].push(mbuf);
                            break;
                        }
                        Following::Linear(next) => {
                            Self::invoke_scalar(&mut self.nodes, &mut self.contexts, node_idx, mbuf);
                            node_idx = next;
                        }
                        Following::Branch(children) => {
                            let branch =
                                Self::invoke_scalar(&mut self.nodes, &mut self.contexts, node_idx, mbuf);
                            node_idx = children[branch];
                        }
                    }
                }
            }

            for (idx, buf) in out_buffers.into_iter().enumerate() {
                if buf.is_empty() {
                    continue;
                }
                let out = &self.outputs[idx];
                let target_lane = lane.min(out.lane_count() - 1);
                safe_enqueue(out.lane(target_lane), &buf, stop_ring, driver);
            }
        }
    }

    fn invoke_scalar(
        nodes: &mut [FuncNode],
        contexts: &mut [Option<Box<dyn CloneableContext>>],
        node_idx: usize,
        mbuf: MbufHandle,
    ) -> usize {
        let ctx = contexts[node_idx].as_deref_mut();
        match nodes[node_idx].logic.as_ref().expect("non-terminator node needs logic") {
            NodeLogic::Scalar(f) => f(mbuf, ctx),
            NodeLogic::Universal(f, _) => f(mbuf, ctx),
            NodeLogic::Vector(_) => panic!("vector-only node reached by the scalar burst loop"),
        }
    }

    /// Runs one vector burst per lane in `lanes` (§4.4).
    pub fn run_vector(&mut self, lanes: &[usize], driver: &dyn NicDriver, stop_ring: &StopRing) {
        if self.nodes.is_empty() {
            return;
        }
        let mut batch = Vec::with_capacity(BURST_SIZE);
        for &lane in lanes {
            batch.clear();
            let n = self.input.lane(lane).dequeue_burst(BURST_SIZE, &mut batch);
            if n == 0 {
                continue;
            }

            let mut out_buffers: Vec<Vec<MbufHandle>> = vec![Vec::new(); self.outputs.len()];
            let full_mask: u32 = if n >= 32 { u32::MAX } else { (1u32 << n) - 1 };

            let mut stack: SmallVec<[(usize, u32); 30]> = SmallVec::new();
            stack.push((self.first, full_mask));
            let mut answers = [0usize; BURST_SIZE];

            while let Some((node_idx, mask)) = stack.pop() {
                if mask == 0 {
                    continue;
                }
                if let Following::Terminator(out_idx) = self.nodes[node_idx].following.clone() {
                    for i in 0..n {
                        if mask & (1 << i) != 0 {
                            out_buffers[out_idx].push(batch[i]);
                        }
                    }
                    continue;
                }

                {
                    let ctx = self.contexts[node_idx].as_deref_mut();
                    match self.nodes[node_idx].logic.as_ref().expect("non-terminator node needs logic") {
                        NodeLogic::Vector(f) => f(&batch[..n], mask, &mut answers, ctx),
                        NodeLogic::Universal(_, f) => f(&batch[..n], mask, &mut answers, ctx),
                        NodeLogic::Scalar(_) => panic!("scalar-only node reached by the vector burst loop"),
                    }
                }

                match self.nodes[node_idx].following.clone() {
                    Following::Terminator(_) => unreachable!(),
                    Following::Linear(next) => stack.push((next, mask)),
                    Following::Branch(children) => {
                        for (branch_idx, &child) in children.iter().enumerate() {
                            let mut child_mask = 0u32;
                            for i in 0..n {
                                if mask & (1 << i) != 0 && answers[i] == branch_idx {
                                    child_mask |= 1 << i;
                                }
                            }
                            if child_mask != 0 {
                                stack.push((child, child_mask));
                            }
                        }
                    }
                }
            }

            for (idx, buf) in out_buffers.into_iter().enumerate() {
                if buf.is_empty() {
                    continue;
                }
                let out = &self.outputs[idx];
                let target_lane = lane.min(out.lane_count() - 1);
                safe_enqueue(out.lane(target_lane), &buf, stop_ring, driver);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testkit::MemoryDriver;
    use crate::ring::Rings;
    use std::sync::Arc;

    fn make_driver() -> MemoryDriver {
        MemoryDriver::new(1, 1)
    }

    #[test]
    fn scalar_segment_routes_even_odd() {
        let driver = make_driver();
        let input = Rings::new(1, 64);
        let mut seg = Segment::new(input.clone());

        let out_a = seg.add_output(Rings::new(1, 64));
        let out_b = seg.add_output(Rings::new(1, 64));

        let term_even = seg
            .try_add_node(None, Following::Terminator(out_a), None)
            .unwrap();
        let term_odd = seg
            .try_add_node(None, Following::Terminator(out_b), None)
            .unwrap();

        let route: ScalarFn = Arc::new(|mbuf: MbufHandle, _ctx| (mbuf.0 % 2) as usize);
        let branch_idx = seg
            .try_add_node(
                Some(NodeLogic::Scalar(route)),
                Following::Branch(SmallVec::from_slice(&[term_even, term_odd])),
                None,
            )
            .unwrap();
        seg.set_root(branch_idx);

        let stop = StopRing::new(64);
        for i in 0..10u64 {
            input.lane(0).enqueue_burst(&[MbufHandle(i)]);
        }
        seg.run_scalar(&[0], &driver, &stop);

        let mut out = Vec::new();
        seg.outputs()[out_a].lane(0).dequeue_burst(64, &mut out);
        assert_eq!(out.len(), 5);
        out.clear();
        seg.outputs()[out_b].lane(0).dequeue_burst(64, &mut out);
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn vector_segment_masks_are_disjoint_and_exhaustive() {
        let driver = make_driver();
        let input = Rings::new(1, 64);
        let mut seg = Segment::new(input.clone());
        let out_a = seg.add_output(Rings::new(1, 64));
        let out_b = seg.add_output(Rings::new(1, 64));
        let term_even = seg.try_add_node(None, Following::Terminator(out_a), None).unwrap();
        let term_odd = seg.try_add_node(None, Following::Terminator(out_b), None).unwrap();

        let route: VectorFn = Arc::new(|batch: &[MbufHandle], mask: u32, answers: &mut [usize; BURST_SIZE], _ctx| {
            for (i, mbuf) in batch.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    answers[i] = (mbuf.0 % 2) as usize;
                }
            }
        });
        let branch_idx = seg
            .try_add_node(
                Some(NodeLogic::Vector(route)),
                Following::Branch(SmallVec::from_slice(&[term_even, term_odd])),
                None,
            )
            .unwrap();
        seg.set_root(branch_idx);

        for i in 0..20u64 {
            input.lane(0).enqueue_burst(&[MbufHandle(i)]);
        }
        let stop = StopRing::new(64);
        seg.run_vector(&[0], &driver, &stop);

        let mut even = Vec::new();
        seg.outputs()[out_a].lane(0).dequeue_burst(64, &mut even);
        let mut odd = Vec::new();
        seg.outputs()[out_b].lane(0).dequeue_burst(64, &mut odd);
        assert_eq!(even.len() + odd.len(), 20);
        assert!(even.iter().all(|m| m.0 % 2 == 0));
        assert!(odd.iter().all(|m| m.0 % 2 == 1));
    }

    #[test]
    fn mixed_scalar_vector_nodes_cannot_join_one_segment() {
        let input = Rings::new(1, 64);
        let mut seg = Segment::new(input);
        let scalar: ScalarFn = Arc::new(|_m, _c| 0);
        seg.try_add_node(Some(NodeLogic::Scalar(scalar)), Following::Linear(1), None)
            .unwrap();
        let vector: VectorFn = Arc::new(|_b, _m, _a, _c| {});
        let result = seg.try_add_node(Some(NodeLogic::Vector(vector)), Following::Linear(2), None);
        assert!(result.is_err());
    }
}
