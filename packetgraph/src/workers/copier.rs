//! Copier worker: duplicates every packet it sees into a second output ring (§4.2).
//!
//! Unlike the fused Func-tree nodes a segment runs, the copier needs driver-level access (bulk
//! allocation, raw byte copy) that a node callable's `(packet, ctx)` signature doesn't carry — so
//! it is its own worker, consuming one materialized ring and feeding two.

use crate::config::BURST_SIZE;
use crate::driver::MbufHandle;
use crate::ring::{safe_enqueue, Rings};
use crate::workers::{WorkerBody, WorkerHandle};

pub struct CopierWorker {
    input: Rings,
    primary: Rings,
    duplicate: Rings,
    scratch: Vec<MbufHandle>,
    dup_scratch: Vec<MbufHandle>,
}

impl CopierWorker {
    pub fn new(input: Rings, primary: Rings, duplicate: Rings) -> Self {
        CopierWorker {
            input,
            primary,
            duplicate,
            scratch: Vec::with_capacity(BURST_SIZE),
            dup_scratch: Vec::with_capacity(BURST_SIZE),
        }
    }
}

impl WorkerBody for CopierWorker {
    fn name(&self) -> &str {
        "copier"
    }

    fn tick(&mut self, handle: &WorkerHandle) {
        for lane in 0..self.input.lane_count() {
            self.scratch.clear();
            let moved = self.input.lane(lane).dequeue_burst(BURST_SIZE, &mut self.scratch);
            if moved == 0 {
                continue;
            }

            self.dup_scratch.clear();
            for &mbuf in &self.scratch {
                let bytes = handle.pool.bytes_of(mbuf);
                self.dup_scratch.push(handle.pool.construct(&bytes));
            }

            let primary_lane = lane.min(self.primary.lane_count() - 1);
            let dup_lane = lane.min(self.duplicate.lane_count() - 1);
            safe_enqueue(self.primary.lane(primary_lane), &self.scratch, &handle.stop_ring, handle.driver.as_ref());
            safe_enqueue(
                self.duplicate.lane(dup_lane),
                &self.dup_scratch,
                &handle.stop_ring,
                handle.driver.as_ref(),
            );
        }
    }
}
