//! The build-time error taxonomy surfaced to callers of the graph builder and lifecycle.
//!
//! Runtime faults inside a worker's hot loop are not represented here: per the crate's error
//! handling design, those are fatal and are logged and terminate the process rather than
//! propagated as a `Result` (see [`crate::lifecycle`]).

use std::fmt;

/// A build-time or lifecycle-ordering error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A caller-supplied argument failed validation (e.g. a non-positive generator rate).
    BadArgument(String),
    /// A port index was outside the range of ports known to the driver.
    PortOutOfRange {
        /// The offending port index.
        port: u16,
        /// The number of ports the driver reported.
        port_count: u16,
    },
    /// `set_receiver` was called twice for the same port.
    DuplicateReceiveOnPort(u16),
    /// `set_sender_kni` was called twice for the same port.
    DuplicateKernelBridgeOnPort(u16),
    /// A method was called with a `Flow` that does not exist (a default/empty handle).
    FlowNil,
    /// A `Flow` was used after it had already been consumed by a sink or merge.
    FlowUsedAfterClose,
    /// `Graph::start` was called while one or more `Flow` handles were still open.
    OpenFlowAtStart(usize),
    /// The scheduler failed to start (e.g. it rejected the worker set).
    SchedulerStartFailure(String),
    /// An IP/host address supplied for a kernel-bridge or remote binding was invalid.
    WrongPort(String),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::BadArgument(msg) => write!(f, "bad argument: {msg}"),
            BuildError::PortOutOfRange { port, port_count } => {
                write!(f, "port {port} out of range (driver reports {port_count} ports)")
            }
            BuildError::DuplicateReceiveOnPort(port) => {
                write!(f, "port {port} already has a receiver attached")
            }
            BuildError::DuplicateKernelBridgeOnPort(port) => {
                write!(f, "port {port} already has a kernel bridge attached")
            }
            BuildError::FlowNil => write!(f, "flow is nil"),
            BuildError::FlowUsedAfterClose => write!(f, "flow used after it was closed"),
            BuildError::OpenFlowAtStart(count) => {
                write!(f, "{count} flow(s) still open at start")
            }
            BuildError::SchedulerStartFailure(msg) => write!(f, "scheduler failed to start: {msg}"),
            BuildError::WrongPort(msg) => write!(f, "wrong port: {msg}"),
        }
    }
}

impl std::error::Error for BuildError {}

/// Convenience alias for the `Result` type returned by fallible builder and lifecycle methods.
pub type BuildResult<T> = Result<T, BuildError>;
