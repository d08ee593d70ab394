//! packetgraph: a burst-oriented packet-processing data-flow runtime over a polled-mode NIC
//! driver (§1, §2).
//!
//! A caller builds a graph with [`Graph`], wiring sources (`set_receiver`, `set_generator`, ...)
//! through handlers, separators, splitters, and partitioners to sinks (`set_sender`,
//! `set_stopper`, ...), then calls [`Graph::start`] to hand control to a running [`System`].
//! Everything in between — segment fusion, ring sizing, flow bookkeeping — is this crate's job;
//! the NIC driver and packet pool are supplied by the caller through [`NicDriver`] and
//! [`PacketPool`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use packetgraph::{Configuration, Graph};
//! use packetgraph::driver::testkit::MemoryDriver;
//!
//! let driver = Arc::new(MemoryDriver::new(1, 4));
//! let mut graph = Graph::new(driver.clone(), driver, Configuration::default());
//! let flow = graph.set_receiver(0).unwrap();
//! graph.set_stopper(flow).unwrap();
//! let system = graph.start().unwrap();
//! let token = system.stop_token();
//! token.request_stop();
//! system.run();
//! ```

pub mod config;
pub mod context;
pub mod dataflow;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod partition;
pub mod pcap;
pub mod ports;
pub mod ring;
pub mod scheduler;
pub mod segment;
pub mod timers;
pub mod workers;

pub use config::{Configuration, BURST_SIZE};
pub use context::CloneableContext;
pub use dataflow::{Flow, Graph};
pub use driver::{MbufHandle, NicDriver, PacketPool, PortId};
pub use error::{BuildError, BuildResult};
pub use lifecycle::{default_error_handler, StopToken, System};
