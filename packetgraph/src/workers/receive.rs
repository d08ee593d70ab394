//! Receive worker: a thin shim pulling bursts from the driver onto a ring (§4.7).

use crate::config::BURST_SIZE;
use crate::driver::PortId;
use crate::ring::{safe_enqueue, Rings};
use crate::workers::{WorkerBody, WorkerHandle};

/// Drains `port`'s RSS lanes into `output`, one ring lane per RSS lane, in lane order.
pub struct ReceiveWorker {
    port: PortId,
    output: Rings,
    scratch: Vec<crate::driver::MbufHandle>,
}

impl ReceiveWorker {
    pub fn new(port: PortId, output: Rings) -> Self {
        ReceiveWorker { port, output, scratch: Vec::with_capacity(BURST_SIZE) }
    }
}

impl WorkerBody for ReceiveWorker {
    fn name(&self) -> &str {
        "receive"
    }

    fn tick(&mut self, handle: &WorkerHandle) {
        for lane in 0..self.output.lane_count() {
            self.scratch.clear();
            let moved =
                handle.driver.receive_burst(self.port, lane as u32, BURST_SIZE, &mut self.scratch);
            if moved == 0 {
                continue;
            }
            safe_enqueue(self.output.lane(lane), &self.scratch, &handle.stop_ring, handle.driver.as_ref());
        }
    }
}
