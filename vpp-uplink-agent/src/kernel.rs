//! Kernel access seam.
//!
//! Everything the agent does to the host goes through the [`Kernel`] trait:
//! link attributes, addresses and routes over netlink, moving links between
//! network namespaces, and PCI driver binding through sysfs. The production
//! implementation is [`crate::netlink::RtnetlinkKernel`]; tests drive the
//! drivers and the lifecycle controller with an in-memory fake.

use std::fmt;

use vpp_uplink_shared::errors::UplinkResult;
use vpp_uplink_shared::{InterfaceAddress, InterfaceRoute};

/// Link attributes as reported by the kernel for a single lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkAttrs {
    pub index: u32,
    pub name: String,
    pub is_up: bool,
    pub promisc_on: bool,
    pub mtu: u32,
    pub hardware_addr: Option<String>,
}

/// Device information read from sysfs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    /// Name of the bound kernel driver
    pub driver: Option<String>,
    /// PCI address, only for PCI-backed devices
    pub pci_id: Option<String>,
}

/// Running kernel release, major and minor only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
}

impl KernelVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parses an `osrelease` string such as `5.15.0-91-generic`.
    pub fn parse(release: &str) -> Option<Self> {
        let mut parts = release.trim().split(['.', '-']);
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        Some(Self { major, minor })
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Host capabilities probed once at startup, used by driver support checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostInfo {
    pub kernel_version: Option<KernelVersion>,
    pub vfio_pci_loaded: bool,
}

impl HostInfo {
    pub fn probe<K: Kernel>(kernel: &K) -> Self {
        Self {
            kernel_version: kernel.kernel_version(),
            vfio_pci_loaded: kernel.driver_loaded(VFIO_PCI_DRIVER),
        }
    }
}

/// Userspace PCI driver used for DPDK handover.
pub const VFIO_PCI_DRIVER: &str = "vfio-pci";

/// Operations the agent performs against the host kernel.
///
/// Link operations take the [`LinkAttrs`] of a previous lookup so errors can
/// name the interface. Name lookups that do not match any link return
/// [`vpp_uplink_shared::errors::UplinkError::InterfaceNotFound`].
#[allow(async_fn_in_trait)]
pub trait Kernel: Clone {
    /// Looks a link up by name in the agent's namespace.
    async fn link_by_name(&self, name: &str) -> UplinkResult<LinkAttrs>;

    async fn set_link_up(&self, link: &LinkAttrs) -> UplinkResult<()>;

    async fn set_link_down(&self, link: &LinkAttrs) -> UplinkResult<()>;

    async fn set_promisc(&self, link: &LinkAttrs, on: bool) -> UplinkResult<()>;

    async fn set_mtu(&self, link: &LinkAttrs, mtu: u32) -> UplinkResult<()>;

    /// Global and host-scope addresses of the link.
    async fn addresses(&self, link: &LinkAttrs) -> UplinkResult<Vec<InterfaceAddress>>;

    /// Main-table routes leaving through the link, excluding kernel-generated ones.
    async fn routes(&self, link: &LinkAttrs) -> UplinkResult<Vec<InterfaceRoute>>;

    /// Adds an address. An address that is already present is not an error.
    async fn add_address(&self, link: &LinkAttrs, address: &InterfaceAddress) -> UplinkResult<()>;

    /// Adds a route. A route that is already present is not an error.
    async fn add_route(&self, link: &LinkAttrs, route: &InterfaceRoute) -> UplinkResult<()>;

    /// Whether a link with this name exists in the network namespace of `pid`.
    async fn link_exists_in_namespace(&self, name: &str, pid: u32) -> UplinkResult<bool>;

    /// Moves a link from the agent's namespace into the namespace of `pid`.
    async fn move_link_to_namespace(&self, name: &str, pid: u32) -> UplinkResult<()>;

    /// Moves a link from the namespace of `pid` back into the agent's namespace.
    async fn move_link_from_namespace(&self, name: &str, pid: u32) -> UplinkResult<()>;

    fn device_info(&self, name: &str) -> DeviceInfo;

    fn kernel_version(&self) -> Option<KernelVersion>;

    /// Whether a PCI driver is registered with the kernel.
    fn driver_loaded(&self, driver: &str) -> bool;

    /// Rebinds a PCI device. `Some(driver)` forces that driver through
    /// `driver_override`, `None` clears the override so the kernel probes
    /// its default driver again.
    fn bind_pci_driver(&self, interface: &str, pci_id: &str, driver: Option<&str>)
    -> UplinkResult<()>;
}
