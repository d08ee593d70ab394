//! The worker ↔ scheduler handshake and the registry of live workers (§4.8, §5).
//!
//! Clone/pause/retire *policy* (when load justifies a new clone, when to retire an idle one) is
//! explicitly out of scope (§1) — that is left to a caller driving [`Scheduler`] from the outside,
//! e.g. on its own periodic tick. What this module owns is the *mechanism*: the channel protocol,
//! thread spawning, and the registry workers get added to and removed from.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{BuildError, BuildResult};
use crate::ring::StopRing;
use crate::workers::{WorkerBody, WorkerHandle};

/// Sent on a worker's stopper channel. Non-negative values set the pause (in nanoseconds per
/// burst); `-1` asks the worker to terminate.
pub type StopperMessage = i64;

/// Sent back on a worker's report channel: `2` on startup (ready), `1` on acknowledged terminate.
pub type ReportMessage = i64;

const REPORT_READY: ReportMessage = 2;
const REPORT_TERMINATED: ReportMessage = 1;
const STOP_TERMINATE: StopperMessage = -1;

/// A live worker's handle: the scheduler's half of the stopper/report channel pair, plus the
/// spawned thread's join handle.
pub struct WorkerHandleRef {
    pub name: String,
    stopper_tx: Sender<StopperMessage>,
    report_rx: Receiver<ReportMessage>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandleRef {
    /// Sets this worker's pause, in nanoseconds per burst.
    pub fn set_pause(&self, pause_ns: u64) {
        let _ = self.stopper_tx.send(pause_ns as i64);
    }

    /// Sends the terminate message and blocks until the worker acknowledges, per §5's
    /// "`SystemStop` awaits the acknowledge message from each worker".
    pub fn terminate(&mut self) {
        let _ = self.stopper_tx.send(STOP_TERMINATE);
        // Drain any stray reports before the terminate ack, matching a worker that sent a stats
        // report right before observing the terminate message.
        loop {
            match self.report_rx.recv() {
                Ok(REPORT_TERMINATED) => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    /// Waits for the worker's startup-ready report. Returns an error if the thread died before
    /// sending it.
    pub fn await_ready(&self) -> BuildResult<()> {
        match self.report_rx.recv() {
            Ok(REPORT_READY) => Ok(()),
            Ok(other) => Err(BuildError::SchedulerStartFailure(format!(
                "worker {} sent unexpected startup report {other}",
                self.name
            ))),
            Err(_) => Err(BuildError::SchedulerStartFailure(format!(
                "worker {} did not report ready before its channel closed",
                self.name
            ))),
        }
    }
}

/// Owns the stop ring and every worker thread spawned for one running [`crate::lifecycle::System`].
pub struct Scheduler {
    stop_ring: Arc<StopRing>,
    workers: Vec<WorkerHandleRef>,
}

impl Scheduler {
    pub fn new(stop_ring_capacity: usize) -> Self {
        Scheduler { stop_ring: Arc::new(StopRing::new(stop_ring_capacity)), workers: Vec::new() }
    }

    pub fn stop_ring(&self) -> &Arc<StopRing> {
        &self.stop_ring
    }

    /// Spawns `body` as a named OS thread running the handshake loop in [`run_worker`], and
    /// registers it. Waits for the worker's startup-ready report before returning, matching the
    /// lifecycle's synchronous `StartPortsAndMemory`/`Start` sequencing.
    pub fn spawn(&mut self, name: impl Into<String>, handle: WorkerHandle, body: Box<dyn WorkerBody>) -> BuildResult<()> {
        let name = name.into();
        let (stopper_tx, stopper_rx) = mpsc::channel();
        let (report_tx, report_rx) = mpsc::channel();

        let thread_name = name.clone();
        let join = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run_worker(body, handle, stopper_rx, report_tx))
            .map_err(|e| BuildError::SchedulerStartFailure(format!("spawning {thread_name}: {e}")))?;

        let handle_ref = WorkerHandleRef { name: name.clone(), stopper_tx, report_rx, join: Some(join) };
        handle_ref.await_ready()?;
        self.workers.push(handle_ref);
        Ok(())
    }

    /// All currently registered workers.
    pub fn workers(&self) -> &[WorkerHandleRef] {
        &self.workers
    }

    /// Sends terminate to every worker and waits for each acknowledgement, in registration order.
    pub fn terminate_all(&mut self) {
        for worker in &mut self.workers {
            worker.terminate();
        }
        self.workers.clear();
    }
}

/// The handshake loop shared by every worker thread (§4.8). `body.tick` supplies the actual I/O;
/// this function supplies the stopper/report protocol and the busy-wait pacing around it.
pub fn run_worker(
    mut body: Box<dyn WorkerBody>,
    handle: WorkerHandle,
    stopper_rx: Receiver<StopperMessage>,
    report_tx: Sender<ReportMessage>,
) {
    let _ = report_tx.send(REPORT_READY);
    let mut pause_ns: u64 = 0;

    loop {
        match stopper_rx.try_recv() {
            Ok(p) if p >= 0 => pause_ns = p as u64,
            Ok(_) => {
                body.on_retire();
                let _ = report_tx.send(REPORT_TERMINATED);
                return;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                body.on_retire();
                return;
            }
        }

        let mut tick_handle = handle.clone();
        tick_handle.pause_ns = pause_ns;
        body.tick(&tick_handle);

        if pause_ns > 0 {
            let deadline = Instant::now() + Duration::from_nanos(pause_ns);
            while Instant::now() < deadline {
                std::hint::spin_loop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testkit::MemoryDriver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingWorker {
        count: Arc<AtomicUsize>,
    }

    impl WorkerBody for CountingWorker {
        fn name(&self) -> &str {
            "counting"
        }
        fn tick(&mut self, _handle: &WorkerHandle) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handle() -> WorkerHandle {
        let driver = Arc::new(MemoryDriver::new(1, 1));
        WorkerHandle { driver: driver.clone(), pool: driver, stop_ring: Arc::new(StopRing::new(64)), pause_ns: 0 }
    }

    #[test]
    fn spawned_worker_reports_ready_and_then_terminates_cleanly() {
        let mut scheduler = Scheduler::new(64);
        let count = Arc::new(AtomicUsize::new(0));
        let body = Box::new(CountingWorker { count: count.clone() });
        scheduler.spawn("counting", handle(), body).unwrap();
        assert_eq!(scheduler.workers().len(), 1);
        scheduler.terminate_all();
        assert!(count.load(Ordering::SeqCst) > 0);
        assert!(scheduler.workers().is_empty());
    }
}
