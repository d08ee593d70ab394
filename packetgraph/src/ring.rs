//! Fixed-capacity burst queues of mbuf handles, and the `safe_enqueue` overflow contract.
//!
//! A [`Ring`] is one lane's worth of queue; a [`Rings`] groups the lanes that make up a single
//! graph edge. Every enqueue is best-effort: `enqueue_burst` never blocks and never panics on a
//! full ring, it simply reports how many handles it accepted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::driver::{MbufHandle, NicDriver};

/// A single lane's worth of fixed-capacity MPMC queue.
pub struct Ring {
    capacity: usize,
    queue: Mutex<VecDeque<MbufHandle>>,
}

impl Ring {
    /// Allocates an empty ring holding at most `capacity` mbufs.
    pub fn new(capacity: usize) -> Self {
        Ring {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Enqueues as many of `items` as fit, returning the count actually moved. Never blocks.
    pub fn enqueue_burst(&self, items: &[MbufHandle]) -> usize {
        let mut queue = self.queue.lock().unwrap();
        let room = self.capacity.saturating_sub(queue.len());
        let moved = room.min(items.len());
        queue.extend(items[..moved].iter().copied());
        moved
    }

    /// Dequeues up to `max` mbufs into `out`, returning the count moved. Never blocks.
    pub fn dequeue_burst(&self, max: usize, out: &mut Vec<MbufHandle>) -> usize {
        let mut queue = self.queue.lock().unwrap();
        let moved = max.min(queue.len());
        out.extend(queue.drain(..moved));
        moved
    }

    /// Current occupancy, for diagnostics and tests.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Whether the ring currently holds no mbufs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The ring's fixed capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// An edge in the graph: one [`Ring`] per receive-side-scaling lane.
///
/// Cloning a `Rings` is cheap — it shares the underlying lanes via `Arc`, which is what lets the
/// merger rewrite a source's destination in place (see [`crate::dataflow::builder`]).
#[derive(Clone)]
pub struct Rings {
    lanes: Vec<Arc<Ring>>,
}

impl Rings {
    /// Allocates `lane_count` fresh lanes, each with `capacity` slots.
    pub fn new(lane_count: usize, capacity: usize) -> Self {
        assert!(lane_count > 0, "a Rings edge needs at least one lane");
        let lanes = (0..lane_count).map(|_| Arc::new(Ring::new(capacity))).collect();
        Rings { lanes }
    }

    /// Number of lanes (parallel RSS queues) this edge carries.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Borrows one lane's ring.
    pub fn lane(&self, index: usize) -> &Arc<Ring> {
        &self.lanes[index]
    }

    /// The maximum lane count between two edges, used when merging inputs of differing width.
    pub fn max_lanes(a: &Rings, b: &Rings) -> usize {
        a.lane_count().max(b.lane_count())
    }
}

/// The process-wide overflow sink. Every producer redirects what a destination ring could not
/// absorb here; a dedicated stop worker drains it back to the driver's mempool. If the stop ring
/// is itself saturated, the residual goes through the driver's synchronous free primitive.
pub struct StopRing {
    ring: Ring,
    dropped: AtomicU64,
}

impl StopRing {
    /// Allocates a stop ring sized `lane_count * capacity`, generously, per the design notes.
    pub fn new(capacity: usize) -> Self {
        StopRing {
            ring: Ring::new(capacity),
            dropped: AtomicU64::new(0),
        }
    }

    /// Total mbufs ever absorbed or freed on overflow.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drains up to `max` mbufs for the stop worker to release.
    pub fn dequeue_burst(&self, max: usize, out: &mut Vec<MbufHandle>) -> usize {
        self.ring.dequeue_burst(max, out)
    }

    /// Hands mbufs directly to the stop ring for eventual release by the stop worker — used by
    /// workers (e.g. the pcap file writer) that are done with a packet immediately rather than
    /// routing it to another segment output.
    pub fn enqueue_burst(&self, items: &[MbufHandle]) -> usize {
        self.ring.enqueue_burst(items)
    }
}

/// Attempts to enqueue `items` onto `target`; anything that doesn't fit is redirected to
/// `stop_ring`, and anything that doesn't fit there either is freed synchronously through
/// `driver`. Returns `(enqueued, deferred_to_stop, direct_freed)`; their sum always equals
/// `items.len()` (invariant 5 of the testable properties).
pub fn safe_enqueue(
    target: &Ring,
    items: &[MbufHandle],
    stop_ring: &StopRing,
    driver: &dyn NicDriver,
) -> (usize, usize, usize) {
    let enqueued = target.enqueue_burst(items);
    let remainder = &items[enqueued..];
    if remainder.is_empty() {
        return (enqueued, 0, 0);
    }

    let deferred = stop_ring.ring.enqueue_burst(remainder);
    let leftover = &remainder[deferred..];
    if !leftover.is_empty() {
        driver.free_burst(leftover);
        stop_ring.dropped.fetch_add(remainder.len() as u64, Ordering::Relaxed);
        log::warn!(
            "ring overflow: {} mbuf(s) dropped ({} deferred to stop ring, {} direct-freed)",
            remainder.len(),
            deferred,
            leftover.len(),
        );
    } else {
        stop_ring.dropped.fetch_add(deferred as u64, Ordering::Relaxed);
    }

    (enqueued, deferred, leftover.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testkit::MemoryDriver;

    #[test]
    fn enqueue_dequeue_roundtrip() {
        let ring = Ring::new(4);
        let items = [MbufHandle(1), MbufHandle(2)];
        assert_eq!(ring.enqueue_burst(&items), 2);
        let mut out = Vec::new();
        assert_eq!(ring.dequeue_burst(10, &mut out), 2);
        assert_eq!(out, items);
    }

    #[test]
    fn enqueue_never_exceeds_capacity() {
        let ring = Ring::new(2);
        let items = [MbufHandle(1), MbufHandle(2), MbufHandle(3)];
        assert_eq!(ring.enqueue_burst(&items), 2);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn overflow_conservation_holds() {
        let driver = MemoryDriver::new(1, 1);
        let target = Ring::new(1);
        let stop = StopRing::new(1);
        let items = [MbufHandle(1), MbufHandle(2), MbufHandle(3)];
        let (enq, deferred, freed) = safe_enqueue(&target, &items, &stop, &driver);
        assert_eq!(enq + deferred + freed, items.len());
        assert_eq!(enq, 1);
        assert_eq!(deferred, 1);
        assert_eq!(freed, 1);
        assert_eq!(stop.dropped_count(), 2);
    }

    #[test]
    fn no_overflow_when_capacity_suffices() {
        let driver = MemoryDriver::new(1, 1);
        let target = Ring::new(8);
        let stop = StopRing::new(8);
        let items = [MbufHandle(1), MbufHandle(2)];
        let (enq, deferred, freed) = safe_enqueue(&target, &items, &stop, &driver);
        assert_eq!((enq, deferred, freed), (2, 0, 0));
        assert_eq!(stop.dropped_count(), 0);
    }
}
