//! Dataplane client.
//!
//! The uplink drivers only need a handful of dataplane requests: create a
//! capture interface for a kernel link (one request per driver technology),
//! resolve the index of a DPDK-owned port, and tag an interface. The
//! [`DataplaneClient`] trait is that surface; [`vppctl::VppctlClient`] is the
//! production implementation over the VPP CLI socket.

use vpp_uplink_shared::errors::DataplaneResult;
use vpp_uplink_shared::{InterfaceSpec, RxMode};

pub mod vppctl;

/// Settings shared by every dataplane interface created for an uplink.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericVppInterface {
    /// Kernel interface the dataplane attaches to
    pub host_interface_name: String,
    pub num_rx_queues: u16,
    pub num_tx_queues: u16,
    pub rx_queue_size: u32,
    pub tx_queue_size: u32,
    pub rx_mode: RxMode,
    /// MAC address to program on the dataplane side
    pub hardware_addr: Option<String>,
}

impl GenericVppInterface {
    pub fn from_spec(spec: &InterfaceSpec, hardware_addr: Option<String>) -> Self {
        Self {
            host_interface_name: spec.interface_name.clone(),
            num_rx_queues: spec.num_rx_queues,
            num_tx_queues: spec.num_tx_queues,
            rx_queue_size: spec.rx_queue_size,
            tx_queue_size: spec.tx_queue_size,
            rx_mode: spec.rx_mode,
            hardware_addr,
        }
    }
}

/// AF_PACKET capture socket bound to a kernel link.
#[derive(Debug, Clone, PartialEq)]
pub struct AfPacketInterface {
    pub generic: GenericVppInterface,
}

/// AF_XDP socket bound to the NIC queues of a kernel link.
#[derive(Debug, Clone, PartialEq)]
pub struct AfXdpInterface {
    pub generic: GenericVppInterface,
}

/// RDMA queues on a Mellanox NIC.
#[derive(Debug, Clone, PartialEq)]
pub struct RdmaInterface {
    pub generic: GenericVppInterface,
}

/// Requests the uplink drivers issue to the dataplane.
///
/// Every creation request returns the software interface index the
/// dataplane assigned.
#[allow(async_fn_in_trait)]
pub trait DataplaneClient {
    async fn create_af_packet(&self, intf: &AfPacketInterface) -> DataplaneResult<u32>;

    async fn create_af_xdp(&self, intf: &AfXdpInterface) -> DataplaneResult<u32>;

    async fn create_rdma(&self, intf: &RdmaInterface) -> DataplaneResult<u32>;

    /// Index of the port DPDK created for the PCI device `pci_id`.
    async fn dpdk_interface_index(&self, pci_id: &str) -> DataplaneResult<u32>;

    async fn tag_interface(&self, sw_if_index: u32, tag: &str) -> DataplaneResult<()>;
}
