//! Send worker: a thin shim draining a ring onto the driver's TX queue (§4.7).

use crate::config::BURST_SIZE;
use crate::driver::{MbufHandle, PortId};
use crate::ring::Rings;
use crate::workers::{WorkerBody, WorkerHandle};

/// Drains every lane of `input` and hands each burst to `port`'s `queue`. Anything the driver
/// doesn't accept is freed synchronously — there is nowhere downstream left to redirect it to.
pub struct SendWorker {
    port: PortId,
    queue: u32,
    input: Rings,
    scratch: Vec<MbufHandle>,
}

impl SendWorker {
    pub fn new(port: PortId, queue: u32, input: Rings) -> Self {
        SendWorker { port, queue, input, scratch: Vec::with_capacity(BURST_SIZE) }
    }
}

impl WorkerBody for SendWorker {
    fn name(&self) -> &str {
        "send"
    }

    fn tick(&mut self, handle: &WorkerHandle) {
        for lane in 0..self.input.lane_count() {
            self.scratch.clear();
            let moved = self.input.lane(lane).dequeue_burst(BURST_SIZE, &mut self.scratch);
            if moved == 0 {
                continue;
            }
            let sent = handle.driver.send_burst(self.port, self.queue, &self.scratch);
            if sent < self.scratch.len() {
                let unsent = &self.scratch[sent..];
                log::warn!("send worker: driver accepted {sent}/{} mbufs, freeing the rest", self.scratch.len());
                handle.driver.free_burst(unsent);
            }
        }
    }
}
