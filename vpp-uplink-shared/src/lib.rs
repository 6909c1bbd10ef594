//! Shared types for the vpp-uplink agent and its diagnostic tools.
//!
//! This crate holds the data model that flows between the configuration
//! layer, the uplink drivers and the lifecycle controller:
//!
//! * [`InterfaceSpec`] - what the operator asked for, per uplink
//! * [`LinuxInterfaceState`] - what the kernel looked like before handover
//! * [`DriverKind`] - which uplink technology manages an interface
//! * [`errors`] - the error taxonomy shared by every component
//! * [`pod_state`] - the CNI per-pod state records read by `debug-state`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

pub mod errors;
pub mod pod_state;

/// The VPP configuration guarantees the main uplink is the first interface
/// created, so it always lands on this sw_if_index.
pub const DATA_INTERFACE_SW_IF_INDEX: u32 = 1;

/// Well-known runtime file locations.
pub mod paths {
    pub const VPP_CLI_SOCKET: &str = "/run/vpp/cli.sock";
    pub const VPP_PID_FILE: &str = "/var/run/vpp/calico_vpp.pid";
    pub const UPLINK_STATE_FILE: &str = "/var/run/vpp/uplink_state.json";
    pub const CNI_SERVER_STATE_FILE: &str = "/var/run/vpp/calico_vpp_pod_state";
}

/// Uplink technology used to hand an interface to the dataplane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// AF_PACKET capture socket, works on any interface
    AfPacket,
    /// AF_XDP memory-mapped NIC queues
    AfXdp,
    /// Mellanox RDMA hardware queues
    Rdma,
    /// DPDK kernel bypass through vfio-pci
    Dpdk,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::AfPacket => "af_packet",
            DriverKind::AfXdp => "af_xdp",
            DriverKind::Rdma => "rdma",
            DriverKind::Dpdk => "dpdk",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "af_packet" => Ok(DriverKind::AfPacket),
            "af_xdp" => Ok(DriverKind::AfXdp),
            "rdma" => Ok(DriverKind::Rdma),
            "dpdk" => Ok(DriverKind::Dpdk),
            other => Err(format!(
                "unknown driver '{}', expected one of af_packet, af_xdp, rdma, dpdk",
                other
            )),
        }
    }
}

/// Receive mode of the dataplane queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RxMode {
    Interrupt,
    Polling,
    #[default]
    Adaptive,
}

impl RxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RxMode::Interrupt => "interrupt",
            RxMode::Polling => "polling",
            RxMode::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for RxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator intent for one uplink. Built once from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    /// Kernel interface name (e.g. "eth0")
    pub interface_name: String,
    /// Whether this is the node's primary uplink
    pub is_main: bool,
    /// Requested driver, `None` means auto-detect
    pub native_driver: Option<DriverKind>,
    /// MTU to program, `None` keeps the kernel value
    pub mtu: Option<u32>,
    pub num_rx_queues: u16,
    pub num_tx_queues: u16,
    /// Ring sizes, 0 means dataplane default
    pub rx_queue_size: u32,
    pub tx_queue_size: u32,
    pub rx_mode: RxMode,
}

impl InterfaceSpec {
    /// Uplink request with default queue settings and auto-detected driver.
    pub fn new(interface_name: impl Into<String>, is_main: bool) -> Self {
        Self {
            interface_name: interface_name.into(),
            is_main,
            native_driver: None,
            mtu: None,
            num_rx_queues: 1,
            num_tx_queues: 1,
            rx_queue_size: 0,
            tx_queue_size: 0,
            rx_mode: RxMode::default(),
        }
    }
}

/// An address assigned to an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceAddress {
    pub address: IpAddr,
    pub prefix_len: u8,
}

impl InterfaceAddress {
    pub fn new(address: IpAddr, prefix_len: u8) -> Self {
        Self {
            address,
            prefix_len,
        }
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

/// A route whose output interface is the managed interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceRoute {
    /// Destination network; the unspecified address with prefix 0 is a default route
    pub destination: IpAddr,
    pub prefix_len: u8,
    pub gateway: Option<IpAddr>,
    pub priority: Option<u32>,
}

impl InterfaceRoute {
    pub fn default_v4(gateway: Ipv4Addr) -> Self {
        Self {
            destination: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            prefix_len: 0,
            gateway: Some(IpAddr::V4(gateway)),
            priority: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.prefix_len == 0
    }
}

impl fmt::Display for InterfaceRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            write!(f, "default")?;
        } else {
            write!(f, "{}/{}", self.destination, self.prefix_len)?;
        }
        if let Some(gw) = self.gateway {
            write!(f, " via {}", gw)?;
        }
        Ok(())
    }
}

/// Kernel-side view of an interface, captured before handover and used
/// to restore it afterwards.
///
/// The snapshot is best-effort: it is assembled from several netlink dumps
/// and is not atomic against concurrent reconfiguration by another process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinuxInterfaceState {
    pub interface_name: String,
    /// Kernel ifindex at capture time
    pub index: u32,
    pub is_up: bool,
    pub promisc_on: bool,
    pub mtu: u32,
    pub hardware_addr: Option<String>,
    /// Kernel driver bound to the device (e.g. "mlx5_core")
    pub driver: Option<String>,
    /// PCI address of the device, present only for physical NICs
    pub pci_id: Option<String>,
    pub addresses: Vec<InterfaceAddress>,
    pub routes: Vec<InterfaceRoute>,
}

impl LinuxInterfaceState {
    /// A bare physical device backed by a PCI function.
    pub fn is_physical(&self) -> bool {
        self.pci_id.is_some()
    }
}

/// Formats a MAC address the way `ip link` prints it.
pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
