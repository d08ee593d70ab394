//! Port records and capability queries (§3, §6).

use crate::driver::{NicDriver, PortId};
use crate::error::{BuildError, BuildResult};

/// Per-NIC-port bookkeeping the builder accumulates as the user requests receivers, senders, and
/// kernel-bridge taps against that port.
#[derive(Debug, Clone)]
pub struct PortRecord {
    pub port: PortId,
    /// Set once any builder method names this port.
    pub was_requested: bool,
    /// A receiver has been registered on this port.
    pub will_receive: bool,
    /// Number of TX queues booked so far, monotonically assigned to senders.
    pub tx_queues_number: u32,
    /// Kernel-bridge tap requested, bound to this core if so.
    pub will_kni: Option<usize>,
    /// Cached MAC address, fetched once from the driver the first time this port is touched.
    pub mac_address: [u8; 6],
    /// `min(user-requested max, driver-advertised RSS queue count)`.
    pub in_index: u32,
}

impl PortRecord {
    fn new(driver: &dyn NicDriver, port: PortId) -> Self {
        PortRecord {
            port,
            was_requested: true,
            will_receive: false,
            tx_queues_number: 0,
            will_kni: None,
            mac_address: driver.mac_address(port),
            in_index: 0,
        }
    }
}

/// The builder's view of every port it has touched, backed by the driver's reported port count.
pub struct PortTable {
    records: Vec<Option<PortRecord>>,
    max_in_index: u32,
}

impl PortTable {
    /// Creates an empty table sized to the driver's reported port count, capping every future
    /// `in_index` assignment at `max_in_index` (`Configuration::max_in_index`).
    pub fn new(driver: &dyn NicDriver, max_in_index: u32) -> Self {
        let count = driver.port_count() as usize;
        PortTable { records: vec![None; count], max_in_index }
    }

    fn check_range(&self, driver: &dyn NicDriver, port: PortId) -> BuildResult<()> {
        if port.0 as usize >= self.records.len() {
            return Err(BuildError::PortOutOfRange { port: port.0, port_count: driver.port_count() });
        }
        Ok(())
    }

    /// Returns the record for `port`, creating it (fetching the MAC from the driver) on first
    /// touch.
    pub fn touch(&mut self, driver: &dyn NicDriver, port: PortId) -> BuildResult<&mut PortRecord> {
        self.check_range(driver, port)?;
        let slot = &mut self.records[port.0 as usize];
        if slot.is_none() {
            *slot = Some(PortRecord::new(driver, port));
        }
        Ok(slot.as_mut().unwrap())
    }

    /// Registers a receiver on `port`, computing its capped `in_index` from the driver's RSS
    /// queue count. Fails if a receiver is already registered there.
    pub fn register_receive(&mut self, driver: &dyn NicDriver, port: PortId) -> BuildResult<u32> {
        self.check_range(driver, port)?;
        let rss = driver.rss_queue_count(port).max(1);
        let max_in_index = self.max_in_index;
        let record = self.touch(driver, port)?;
        if record.will_receive {
            return Err(BuildError::DuplicateReceiveOnPort(port.0));
        }
        record.will_receive = true;
        record.in_index = rss.min(max_in_index);
        Ok(record.in_index)
    }

    /// Books the next TX queue on `port`, returning its index.
    pub fn reserve_tx_queue(&mut self, driver: &dyn NicDriver, port: PortId) -> BuildResult<u32> {
        let record = self.touch(driver, port)?;
        let queue = record.tx_queues_number;
        record.tx_queues_number += 1;
        Ok(queue)
    }

    /// Registers a kernel-bridge tap on `port` bound to `core`. Fails if one is already
    /// registered there.
    pub fn register_kernel_bridge(&mut self, driver: &dyn NicDriver, port: PortId, core: usize) -> BuildResult<()> {
        let record = self.touch(driver, port)?;
        if record.will_kni.is_some() {
            return Err(BuildError::DuplicateKernelBridgeOnPort(port.0));
        }
        record.will_kni = Some(core);
        Ok(())
    }

    /// All ports touched so far, in port-index order.
    pub fn touched(&self) -> impl Iterator<Item = &PortRecord> {
        self.records.iter().filter_map(|r| r.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testkit::MemoryDriver;

    #[test]
    fn registering_a_second_receiver_on_the_same_port_fails() {
        let driver = MemoryDriver::new(2, 4);
        let mut table = PortTable::new(&driver, 16);
        table.register_receive(&driver, PortId(0)).unwrap();
        let err = table.register_receive(&driver, PortId(0)).unwrap_err();
        assert_eq!(err, BuildError::DuplicateReceiveOnPort(0));
    }

    #[test]
    fn in_index_is_capped_by_configuration() {
        let driver = MemoryDriver::new(1, 64);
        let mut table = PortTable::new(&driver, 8);
        let in_index = table.register_receive(&driver, PortId(0)).unwrap();
        assert_eq!(in_index, 8);
    }

    #[test]
    fn out_of_range_port_is_an_error() {
        let driver = MemoryDriver::new(1, 4);
        let mut table = PortTable::new(&driver, 16);
        let err = table.register_receive(&driver, PortId(5)).unwrap_err();
        assert_eq!(err, BuildError::PortOutOfRange { port: 5, port_count: 1 });
    }

    #[test]
    fn tx_queues_are_assigned_monotonically() {
        let driver = MemoryDriver::new(1, 4);
        let mut table = PortTable::new(&driver, 16);
        assert_eq!(table.reserve_tx_queue(&driver, PortId(0)).unwrap(), 0);
        assert_eq!(table.reserve_tx_queue(&driver, PortId(0)).unwrap(), 1);
    }
}
