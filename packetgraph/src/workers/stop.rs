//! Stop worker: drains the shared overflow ring back to the driver's mempool (§4.1, §9).

use crate::config::BURST_SIZE;
use crate::driver::MbufHandle;
use crate::workers::{WorkerBody, WorkerHandle};

/// The single process-wide worker responsible for freeing whatever [`crate::ring::safe_enqueue`]
/// could not place on a destination ring.
pub struct StopWorker {
    scratch: Vec<MbufHandle>,
}

impl StopWorker {
    pub fn new() -> Self {
        StopWorker { scratch: Vec::with_capacity(BURST_SIZE) }
    }
}

impl Default for StopWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerBody for StopWorker {
    fn name(&self) -> &str {
        "stop"
    }

    fn tick(&mut self, handle: &WorkerHandle) {
        self.scratch.clear();
        let moved = handle.stop_ring.dequeue_burst(BURST_SIZE, &mut self.scratch);
        if moved > 0 {
            handle.driver.free_burst(&self.scratch);
        }
    }
}
