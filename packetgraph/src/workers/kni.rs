//! Kernel-bridge worker: binds a port to a tap device on a scheduler-assigned core (§4.7).

use crate::driver::PortId;
use crate::workers::{WorkerBody, WorkerHandle};

/// Creates the kernel-bridge device on its first tick and otherwise does nothing further — once
/// bound, kernel-to-wire forwarding for a tap device is the driver's concern, not this runtime's.
pub struct KernelBridgeWorker {
    port: PortId,
    core: usize,
    bound: bool,
}

impl KernelBridgeWorker {
    pub fn new(port: PortId, core: usize) -> Self {
        KernelBridgeWorker { port, core, bound: false }
    }
}

impl WorkerBody for KernelBridgeWorker {
    fn name(&self) -> &str {
        "kernel-bridge"
    }

    fn tick(&mut self, handle: &WorkerHandle) {
        if self.bound {
            return;
        }
        self.bound = true;
        if !handle.driver.create_kernel_bridge(self.port, self.core) {
            log::error!("kernel-bridge device for port {} failed to bind on core {}", self.port.0, self.core);
        }
    }
}
