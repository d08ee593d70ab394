//! Contracts for the collaborators this crate treats as external: the poll-mode NIC driver and
//! the packet/mbuf library. Neither is implemented here — a real deployment wires in a driver
//! crate that implements [`NicDriver`] and a parsing crate that implements [`PacketPool`]. A small
//! in-memory test double of both lives in [`testkit`] and backs this crate's own unit and
//! integration tests.

use std::fmt;

/// An opaque, pointer-sized handle to a packet buffer owned by the driver's mempool.
///
/// The runtime never dereferences this value; it only ever passes it back to a [`NicDriver`] or
/// [`PacketPool`] implementation. Freeing happens exclusively through [`NicDriver::free_burst`] or
/// [`NicDriver::stop_free`], never implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MbufHandle(pub u64);

impl fmt::Display for MbufHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mbuf#{}", self.0)
    }
}

/// Identifies one NIC port as known to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u16);

/// The subset of poll-mode-driver functionality the runtime depends on.
///
/// Port creation/enumeration, mempool lifecycle, and the actual burst I/O primitives belong to a
/// concrete driver implementation; this crate only ever calls through this trait.
pub trait NicDriver: Send + Sync {
    /// Number of ports the driver has enumerated.
    fn port_count(&self) -> u16;
    /// Number of hardware RSS queues the driver advertises for a port.
    fn rss_queue_count(&self, port: PortId) -> u32;
    /// The port's cached MAC address, six bytes.
    fn mac_address(&self, port: PortId) -> [u8; 6];
    /// Books a TX queue on `port`, returning its queue index.
    fn reserve_tx_queue(&self, port: PortId) -> u32;
    /// Receives up to `max` packets from `port`'s RSS `lane`, appending handles to `out`.
    /// Returns the number received. Never blocks.
    fn receive_burst(&self, port: PortId, lane: u32, max: usize, out: &mut Vec<MbufHandle>) -> usize;
    /// Sends `items` on `port`'s `queue`. Returns the number actually sent. Never blocks.
    fn send_burst(&self, port: PortId, queue: u32, items: &[MbufHandle]) -> usize;
    /// Allocates `count` fresh mbufs from the driver's mempool, appending to `out`.
    fn alloc_bulk(&self, count: usize, out: &mut Vec<MbufHandle>);
    /// Synchronously frees a burst of mbufs back to the mempool. Used when the stop ring itself
    /// cannot absorb an overflow.
    fn free_burst(&self, items: &[MbufHandle]);
    /// Creates a kernel-bridge (tap) device bound to `port`, running on `core`.
    fn create_kernel_bridge(&self, port: PortId, core: usize) -> bool;
    /// Requests hardware TX checksum offload on `port`, if the device advertises the capability.
    /// Returns whether the offload ended up enabled. Queried/enabled once, during
    /// `StartPortsAndMemory` (§6, §8's "Capabilities & ports").
    fn enable_hw_tx_checksum(&self, port: PortId) -> bool;
}

/// The subset of packet/mbuf-parsing functionality the runtime depends on.
pub trait PacketPool: Send + Sync {
    /// Raw byte contents of the packet backing `mbuf`, for pcap writing or copier duplication.
    fn bytes_of(&self, mbuf: MbufHandle) -> Vec<u8>;
    /// Constructs a fresh mbuf from raw bytes (used by the pcap reader and fast generator).
    fn construct(&self, bytes: &[u8]) -> MbufHandle;
    /// Sets the hardware-TX-checksum-requested flag on a packet.
    fn set_hw_checksum_flag(&self, mbuf: MbufHandle, enabled: bool);
}

/// An in-memory [`NicDriver`]/[`PacketPool`] double used by this crate's own tests. Not part of
/// the public contract a real deployment would implement against, but kept public so integration
/// tests in `tests/` can exercise the runtime without a real NIC.
pub mod testkit {
    use super::{MbufHandle, NicDriver, PacketPool, PortId};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// A driver double backed by an in-process byte arena; every "port" is purely notional.
    pub struct MemoryDriver {
        next_handle: AtomicU64,
        arena: Mutex<HashMap<u64, Vec<u8>>>,
        port_count: u16,
        rss_queues: u32,
    }

    impl MemoryDriver {
        /// Creates a double reporting `port_count` ports, each advertising `rss_queues` RSS lanes.
        pub fn new(port_count: u16, rss_queues: u32) -> Self {
            MemoryDriver {
                next_handle: AtomicU64::new(1),
                arena: Mutex::new(HashMap::new()),
                port_count,
                rss_queues,
            }
        }

        /// Number of mbufs still live in the arena (i.e. not freed). Useful for leak assertions.
        pub fn live_count(&self) -> usize {
            self.arena.lock().unwrap().len()
        }
    }

    impl NicDriver for MemoryDriver {
        fn port_count(&self) -> u16 {
            self.port_count
        }
        fn rss_queue_count(&self, _port: PortId) -> u32 {
            self.rss_queues
        }
        fn mac_address(&self, port: PortId) -> [u8; 6] {
            let b = port.0 as u8;
            [0x02, 0x00, 0x00, 0x00, 0x00, b]
        }
        fn reserve_tx_queue(&self, _port: PortId) -> u32 {
            0
        }
        fn receive_burst(&self, _port: PortId, _lane: u32, _max: usize, _out: &mut Vec<MbufHandle>) -> usize {
            // A real RX shim pulls from hardware; the double has nothing to offer on its own.
            0
        }
        fn send_burst(&self, _port: PortId, _queue: u32, items: &[MbufHandle]) -> usize {
            items.len()
        }
        fn alloc_bulk(&self, count: usize, out: &mut Vec<MbufHandle>) {
            let mut arena = self.arena.lock().unwrap();
            for _ in 0..count {
                let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
                arena.insert(id, Vec::new());
                out.push(MbufHandle(id));
            }
        }
        fn free_burst(&self, items: &[MbufHandle]) {
            let mut arena = self.arena.lock().unwrap();
            for item in items {
                arena.remove(&item.0);
            }
        }
        fn create_kernel_bridge(&self, _port: PortId, _core: usize) -> bool {
            true
        }
        fn enable_hw_tx_checksum(&self, _port: PortId) -> bool {
            true
        }
    }

    impl PacketPool for MemoryDriver {
        fn bytes_of(&self, mbuf: MbufHandle) -> Vec<u8> {
            self.arena
                .lock()
                .unwrap()
                .get(&mbuf.0)
                .cloned()
                .unwrap_or_default()
        }
        fn construct(&self, bytes: &[u8]) -> MbufHandle {
            let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
            self.arena.lock().unwrap().insert(id, bytes.to_vec());
            MbufHandle(id)
        }
        fn set_hw_checksum_flag(&self, _mbuf: MbufHandle, _enabled: bool) {}
    }

    impl MemoryDriver {
        /// Test convenience: allocate one mbuf carrying `payload` directly, bypassing `alloc_bulk`.
        pub fn inject(&self, payload: &[u8]) -> MbufHandle {
            PacketPool::construct(self, payload)
        }
    }
}
