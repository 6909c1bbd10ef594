//! Uplink driver strategies.
//!
//! An uplink driver owns one kernel interface from pre-configuration until
//! restoration. The set of drivers is closed ([`UplinkDriver`]); each variant
//! implements the [`Uplink`] contract:
//!
//! * `is_supported` - can this driver manage the captured interface
//! * `preconfigure_linux` - kernel-side preparation before the dataplane takes over
//! * `create_main_vpp_interface` - hand the interface to the dataplane
//! * `restore_linux` - undo everything, best-effort, never fails
//!
//! The state every driver shares (spec, snapshot, dataplane index) lives in
//! [`DriverData`], together with the restore steps common to all variants.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use vpp_uplink_shared::errors::{UplinkError, UplinkResult};
use vpp_uplink_shared::{DATA_INTERFACE_SW_IF_INDEX, DriverKind, InterfaceSpec, LinuxInterfaceState};

use crate::dataplane::{DataplaneClient, GenericVppInterface};
use crate::kernel::{HostInfo, Kernel, LinkAttrs};
use crate::mover;
use crate::utils::error_handling::poll_async;

pub mod af_packet;
pub mod af_xdp;
pub mod dpdk;
pub mod rdma;
pub mod restore;

pub use af_packet::AfPacketDriver;
pub use af_xdp::AfXdpDriver;
pub use dpdk::DpdkDriver;
pub use rdma::RdmaDriver;
pub use restore::{RestoreReport, RestoreStep};

/// Drivers tried, in order, when the operator did not request one.
/// DPDK takes the device away from the kernel entirely and is never picked
/// automatically.
pub const AUTO_DETECT_ORDER: [DriverKind; 3] = [DriverKind::Rdma, DriverKind::AfXdp, DriverKind::AfPacket];

/// Capability contract shared by every uplink driver.
#[allow(async_fn_in_trait)]
pub trait Uplink {
    /// Pure capability check against the snapshot and host facts.
    fn is_supported(&self, warn: bool) -> bool;

    async fn preconfigure_linux(&mut self) -> UplinkResult<()>;

    /// Creates the dataplane interface and returns its index.
    async fn create_main_vpp_interface<V: DataplaneClient>(
        &mut self,
        vpp: &V,
        vpp_pid: u32,
    ) -> UplinkResult<u32>;

    async fn restore_linux(&mut self, all_interfaces_physical: bool) -> RestoreReport;
}

/// State shared by all driver variants.
#[derive(Debug, Clone)]
pub struct DriverData<K> {
    kernel: K,
    spec: InterfaceSpec,
    conf: LinuxInterfaceState,
    host: HostInfo,
    sw_if_index: Option<u32>,
    vpp_pid: Option<u32>,
}

impl<K: Kernel> DriverData<K> {
    pub fn new(kernel: K, spec: InterfaceSpec, conf: LinuxInterfaceState, host: HostInfo) -> Self {
        Self {
            kernel,
            spec,
            conf,
            host,
            sw_if_index: None,
            vpp_pid: None,
        }
    }

    /// Data for an interface a previous agent handed to the dataplane of `vpp_pid`.
    pub fn recovered(
        kernel: K,
        spec: InterfaceSpec,
        conf: LinuxInterfaceState,
        vpp_pid: Option<u32>,
    ) -> Self {
        Self {
            vpp_pid,
            ..Self::new(kernel, spec, conf, HostInfo::default())
        }
    }

    pub fn spec(&self) -> &InterfaceSpec {
        &self.spec
    }

    pub fn conf(&self) -> &LinuxInterfaceState {
        &self.conf
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn sw_if_index(&self) -> Option<u32> {
        self.sw_if_index
    }

    pub fn vpp_pid(&self) -> Option<u32> {
        self.vpp_pid
    }

    pub fn name(&self) -> &str {
        &self.spec.interface_name
    }

    pub(crate) fn generic_vpp_interface(&self) -> GenericVppInterface {
        GenericVppInterface::from_spec(&self.spec, self.conf.hardware_addr.clone())
    }

    pub(crate) async fn lookup_link(&self) -> UplinkResult<LinkAttrs> {
        self.kernel.link_by_name(self.name()).await
    }

    pub(crate) async fn move_interface_to_ns(&mut self, vpp_pid: u32) -> UplinkResult<()> {
        // Recorded first so a rollback tries to move it back even after a partial move
        self.vpp_pid = Some(vpp_pid);
        mover::move_to_namespace(&self.kernel, &self.spec.interface_name, vpp_pid).await
    }

    pub(crate) async fn move_interface_from_ns(&self) -> UplinkResult<()> {
        match self.vpp_pid {
            Some(pid) => mover::move_from_namespace(&self.kernel, self.name(), pid).await,
            None => {
                if self.lookup_link().await.is_ok() {
                    debug!("{} was never moved, nothing to move back", self.name());
                    Ok(())
                } else {
                    Err(UplinkError::NamespaceMove {
                        interface: self.name().to_string(),
                        message: "dataplane pid unknown and interface not in root namespace"
                            .to_string(),
                    })
                }
            }
        }
    }

    /// Checks the primary uplink's index, tags it and records it.
    pub(crate) async fn finish_handover<V: DataplaneClient>(
        &mut self,
        vpp: &V,
        driver: DriverKind,
        sw_if_index: u32,
    ) -> UplinkResult<u32> {
        if self.spec.is_main && sw_if_index != DATA_INTERFACE_SW_IF_INDEX {
            return Err(UplinkError::IndexMismatch {
                interface: self.name().to_string(),
                driver,
                expected: DATA_INTERFACE_SW_IF_INDEX,
                actual: sw_if_index,
            });
        }

        info!("Tagging interface [{}] with: {}", sw_if_index, self.name());
        vpp.tag_interface(sw_if_index, self.name())
            .await
            .map_err(|e| UplinkError::DataplaneTag {
                interface: self.name().to_string(),
                sw_if_index,
                message: e.to_string(),
            })?;

        self.sw_if_index = Some(sw_if_index);
        Ok(sw_if_index)
    }

    pub(crate) fn create_error(&self, driver: DriverKind, err: impl fmt::Display) -> UplinkError {
        UplinkError::DataplaneCreate {
            interface: self.name().to_string(),
            driver,
            message: err.to_string(),
        }
    }

    /// Move back (when relocated), then restore the link state.
    pub(crate) async fn restore_relocated(
        &mut self,
        all_interfaces_physical: bool,
        restore_mtu: bool,
    ) -> RestoreReport {
        let mut report = RestoreReport::new(self.name());

        // Physical interfaces pop back into the root namespace once the dataplane exits
        if !all_interfaces_physical {
            report.record(RestoreStep::MoveFromNamespace, self.move_interface_from_ns().await);
        }

        self.restore_link_state(&mut report, restore_mtu).await;
        report
    }

    /// Admin state, promiscuity, MTU, addresses and routes.
    pub(crate) async fn restore_link_state(&mut self, report: &mut RestoreReport, restore_mtu: bool) {
        self.sw_if_index = None;

        if !self.conf.is_up {
            report.skip_remaining("interface was down before handover");
            return;
        }

        // The captured ifindex may belong to another link by now
        let link = match self.lookup_link().await {
            Ok(link) => link,
            Err(e) => {
                report.record(RestoreStep::LookupLink, Err(e));
                report.skip_remaining("interface not found in the root namespace");
                return;
            }
        };

        report.record(RestoreStep::SetUp, self.kernel.set_link_up(&link).await);

        if !self.conf.promisc_on {
            info!("Setting promisc off on {}", self.name());
            report.record(
                RestoreStep::SetPromiscOff,
                self.kernel.set_promisc(&link, false).await,
            );
        }

        if restore_mtu && link.mtu != self.conf.mtu {
            report.record(
                RestoreStep::RestoreMtu,
                self.kernel.set_mtu(&link, self.conf.mtu).await,
            );
        }

        self.restore_linux_if_conf(&link, report).await;
    }

    /// Re-adds every captured address, then every captured route.
    async fn restore_linux_if_conf(&self, link: &LinkAttrs, report: &mut RestoreReport) {
        for addr in &self.conf.addresses {
            debug!("Adding address {} to {}", addr, self.name());
            report.record(
                RestoreStep::AddAddress(*addr),
                self.kernel.add_address(link, addr).await,
            );
        }
        for route in &self.conf.routes {
            debug!("Adding route {} via {}", route, self.name());
            report.record(
                RestoreStep::AddRoute(*route),
                self.kernel.add_route(link, route).await,
            );
        }
    }

    /// Waits for the kernel netdev to show up again after a driver rebind.
    pub(crate) async fn wait_for_interface(&self) -> UplinkResult<LinkAttrs> {
        poll_async(
            || self.lookup_link(),
            INTERFACE_WAIT_ATTEMPTS,
            Duration::from_millis(100),
            1.5,
            &format!("wait for {}", self.name()),
        )
        .await
    }
}

const INTERFACE_WAIT_ATTEMPTS: u32 = 10;

/// Closed set of uplink drivers.
#[derive(Debug)]
pub enum UplinkDriver<K> {
    AfPacket(AfPacketDriver<K>),
    AfXdp(AfXdpDriver<K>),
    Rdma(RdmaDriver<K>),
    Dpdk(DpdkDriver<K>),
}

impl<K: Kernel> UplinkDriver<K> {
    pub fn new(kind: DriverKind, data: DriverData<K>) -> Self {
        match kind {
            DriverKind::AfPacket => UplinkDriver::AfPacket(AfPacketDriver::new(data)),
            DriverKind::AfXdp => UplinkDriver::AfXdp(AfXdpDriver::new(data)),
            DriverKind::Rdma => UplinkDriver::Rdma(RdmaDriver::new(data)),
            DriverKind::Dpdk => UplinkDriver::Dpdk(DpdkDriver::new(data)),
        }
    }

    pub fn kind(&self) -> DriverKind {
        match self {
            UplinkDriver::AfPacket(_) => DriverKind::AfPacket,
            UplinkDriver::AfXdp(_) => DriverKind::AfXdp,
            UplinkDriver::Rdma(_) => DriverKind::Rdma,
            UplinkDriver::Dpdk(_) => DriverKind::Dpdk,
        }
    }

    pub fn data(&self) -> &DriverData<K> {
        match self {
            UplinkDriver::AfPacket(d) => &d.data,
            UplinkDriver::AfXdp(d) => &d.data,
            UplinkDriver::Rdma(d) => &d.data,
            UplinkDriver::Dpdk(d) => &d.data,
        }
    }

    /// Picks the driver for an interface.
    ///
    /// An explicitly requested driver must be supported, otherwise the
    /// interface is rejected before anything is mutated. Without a request
    /// the first supported driver of [`AUTO_DETECT_ORDER`] wins.
    pub fn select(data: DriverData<K>) -> UplinkResult<Self> {
        if let Some(kind) = data.spec.native_driver {
            let driver = Self::new(kind, data);
            if !driver.is_supported(true) {
                return Err(UplinkError::UnsupportedDriver {
                    interface: driver.data().name().to_string(),
                    driver: kind,
                });
            }
            info!("Using requested driver {} for {}", kind, driver.data().name());
            return Ok(driver);
        }

        for kind in AUTO_DETECT_ORDER {
            let candidate = Self::new(kind, data.clone());
            if candidate.is_supported(false) {
                info!("Auto-detected driver {} for {}", kind, data.name());
                return Ok(candidate);
            }
            debug!("Driver {} not supported for {}", kind, data.name());
        }

        // af_packet supports every interface, so this is only reached if that changes
        warn!("No driver supports {}", data.name());
        Err(UplinkError::UnsupportedDriver {
            interface: data.name().to_string(),
            driver: DriverKind::AfPacket,
        })
    }
}

impl<K: Kernel> Uplink for UplinkDriver<K> {
    fn is_supported(&self, warn: bool) -> bool {
        match self {
            UplinkDriver::AfPacket(d) => d.is_supported(warn),
            UplinkDriver::AfXdp(d) => d.is_supported(warn),
            UplinkDriver::Rdma(d) => d.is_supported(warn),
            UplinkDriver::Dpdk(d) => d.is_supported(warn),
        }
    }

    async fn preconfigure_linux(&mut self) -> UplinkResult<()> {
        match self {
            UplinkDriver::AfPacket(d) => d.preconfigure_linux().await,
            UplinkDriver::AfXdp(d) => d.preconfigure_linux().await,
            UplinkDriver::Rdma(d) => d.preconfigure_linux().await,
            UplinkDriver::Dpdk(d) => d.preconfigure_linux().await,
        }
    }

    async fn create_main_vpp_interface<V: DataplaneClient>(
        &mut self,
        vpp: &V,
        vpp_pid: u32,
    ) -> UplinkResult<u32> {
        match self {
            UplinkDriver::AfPacket(d) => d.create_main_vpp_interface(vpp, vpp_pid).await,
            UplinkDriver::AfXdp(d) => d.create_main_vpp_interface(vpp, vpp_pid).await,
            UplinkDriver::Rdma(d) => d.create_main_vpp_interface(vpp, vpp_pid).await,
            UplinkDriver::Dpdk(d) => d.create_main_vpp_interface(vpp, vpp_pid).await,
        }
    }

    async fn restore_linux(&mut self, all_interfaces_physical: bool) -> RestoreReport {
        match self {
            UplinkDriver::AfPacket(d) => d.restore_linux(all_interfaces_physical).await,
            UplinkDriver::AfXdp(d) => d.restore_linux(all_interfaces_physical).await,
            UplinkDriver::Rdma(d) => d.restore_linux(all_interfaces_physical).await,
            UplinkDriver::Dpdk(d) => d.restore_linux(all_interfaces_physical).await,
        }
    }
}
