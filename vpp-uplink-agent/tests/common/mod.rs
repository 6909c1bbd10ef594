//! In-memory kernel and dataplane used by the integration tests.
//!
//! `FakeKernel` models the parts of the host the agent touches: links in the
//! root namespace and in dataplane namespaces, PCI devices bound away from
//! their kernel driver, and forced failures per operation. Like the real
//! kernel, moving a link between namespaces drops its addresses and routes
//! and sets it down.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use vpp_uplink_agent::dataplane::{
    AfPacketInterface, AfXdpInterface, DataplaneClient, RdmaInterface,
};
use vpp_uplink_agent::kernel::{DeviceInfo, Kernel, KernelVersion, LinkAttrs, VFIO_PCI_DRIVER};
use vpp_uplink_shared::errors::{DataplaneError, DataplaneResult, UplinkError, UplinkResult};
use vpp_uplink_shared::{InterfaceAddress, InterfaceRoute};

/// A kernel link with its configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeLink {
    pub attrs: LinkAttrs,
    pub addresses: Vec<InterfaceAddress>,
    pub routes: Vec<InterfaceRoute>,
    pub device: DeviceInfo,
}

impl FakeLink {
    pub fn new(name: &str, index: u32) -> Self {
        Self {
            attrs: LinkAttrs {
                index,
                name: name.to_string(),
                is_up: false,
                promisc_on: false,
                mtu: 1500,
                hardware_addr: Some("02:42:ac:11:00:02".to_string()),
            },
            addresses: Vec::new(),
            routes: Vec::new(),
            device: DeviceInfo::default(),
        }
    }

    pub fn up(mut self) -> Self {
        self.attrs.is_up = true;
        self
    }

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.attrs.mtu = mtu;
        self
    }

    /// Adds an address given as `ip/len`.
    pub fn address(mut self, cidr: &str) -> Self {
        let (ip, len) = cidr.split_once('/').unwrap();
        self.addresses.push(InterfaceAddress::new(
            ip.parse::<IpAddr>().unwrap(),
            len.parse().unwrap(),
        ));
        self
    }

    pub fn route(mut self, route: InterfaceRoute) -> Self {
        self.routes.push(route);
        self
    }

    pub fn driver(mut self, driver: &str) -> Self {
        self.device.driver = Some(driver.to_string());
        self
    }

    pub fn pci(mut self, pci_id: &str, driver: &str) -> Self {
        self.device.pci_id = Some(pci_id.to_string());
        self.device.driver = Some(driver.to_string());
        self
    }

    /// What the kernel does to a link leaving its namespace.
    fn relocated(mut self) -> Self {
        self.attrs.is_up = false;
        self.addresses.clear();
        self.routes.clear();
        self
    }
}

#[derive(Debug, Default)]
pub struct FakeHost {
    pub root: HashMap<String, FakeLink>,
    pub namespaces: HashMap<u32, HashMap<String, FakeLink>>,
    /// PCI devices bound to a non-kernel driver, by PCI id
    pub unbound: HashMap<String, FakeLink>,
    pub kernel_version: Option<KernelVersion>,
    pub loaded_drivers: HashSet<String>,
    pub failing: HashSet<&'static str>,
    pub calls: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeKernel {
    host: Arc<Mutex<FakeHost>>,
}

fn forced(interface: &str, operation: &str) -> UplinkError {
    UplinkError::Netlink {
        interface: interface.to_string(),
        operation: operation.to_string(),
        message: "forced failure".to_string(),
    }
}

impl FakeKernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link(self, link: FakeLink) -> Self {
        self.host
            .lock()
            .unwrap()
            .root
            .insert(link.attrs.name.clone(), link);
        self
    }

    pub fn with_kernel_version(self, major: u32, minor: u32) -> Self {
        self.host.lock().unwrap().kernel_version = Some(KernelVersion::new(major, minor));
        self
    }

    pub fn with_driver_loaded(self, driver: &str) -> Self {
        self.host
            .lock()
            .unwrap()
            .loaded_drivers
            .insert(driver.to_string());
        self
    }

    /// Makes every call of `operation` fail from now on.
    pub fn fail(&self, operation: &'static str) {
        self.host.lock().unwrap().failing.insert(operation);
    }

    pub fn heal(&self, operation: &'static str) {
        self.host.lock().unwrap().failing.remove(operation);
    }

    pub fn link(&self, name: &str) -> Option<FakeLink> {
        self.host.lock().unwrap().root.get(name).cloned()
    }

    pub fn link_in_namespace(&self, pid: u32, name: &str) -> Option<FakeLink> {
        self.host
            .lock()
            .unwrap()
            .namespaces
            .get(&pid)
            .and_then(|ns| ns.get(name))
            .cloned()
    }

    pub fn is_unbound(&self, pci_id: &str) -> bool {
        self.host.lock().unwrap().unbound.contains_key(pci_id)
    }

    pub fn calls(&self) -> Vec<String> {
        self.host.lock().unwrap().calls.clone()
    }

    pub fn called(&self, operation: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(operation))
    }

    /// Calls that change kernel state.
    pub fn mutations(&self) -> Vec<String> {
        const READ_ONLY: [&str; 5] = [
            "link_by_name",
            "addresses",
            "routes",
            "link_exists_in_namespace",
            "device_info",
        ];
        self.calls()
            .into_iter()
            .filter(|c| !READ_ONLY.iter().any(|op| c.starts_with(op)))
            .collect()
    }

    /// The dataplane process exits: physical devices in its namespace fall
    /// back into the root namespace, virtual ones are destroyed with it.
    pub fn dataplane_exits(&self, pid: u32) {
        let mut host = self.host.lock().unwrap();
        if let Some(ns) = host.namespaces.remove(&pid) {
            for (name, link) in ns {
                if link.device.pci_id.is_some() {
                    host.root.insert(name, link.relocated());
                }
            }
        }
    }

    fn enter(&self, operation: &'static str, interface: &str) -> UplinkResult<()> {
        let mut host = self.host.lock().unwrap();
        host.calls.push(format!("{} {}", operation, interface));
        if host.failing.contains(operation) {
            return Err(forced(interface, operation));
        }
        Ok(())
    }

    fn update_link<F: FnOnce(&mut FakeLink)>(&self, name: &str, f: F) -> UplinkResult<()> {
        let mut host = self.host.lock().unwrap();
        let link = host
            .root
            .get_mut(name)
            .ok_or_else(|| UplinkError::not_found(name))?;
        f(link);
        Ok(())
    }

    fn root_link(&self, name: &str) -> UplinkResult<FakeLink> {
        self.link(name).ok_or_else(|| UplinkError::not_found(name))
    }
}

impl Kernel for FakeKernel {
    async fn link_by_name(&self, name: &str) -> UplinkResult<LinkAttrs> {
        self.enter("link_by_name", name)?;
        self.root_link(name).map(|l| l.attrs)
    }

    async fn set_link_up(&self, link: &LinkAttrs) -> UplinkResult<()> {
        self.enter("set_link_up", &link.name)?;
        self.update_link(&link.name, |l| l.attrs.is_up = true)
    }

    async fn set_link_down(&self, link: &LinkAttrs) -> UplinkResult<()> {
        self.enter("set_link_down", &link.name)?;
        self.update_link(&link.name, |l| l.attrs.is_up = false)
    }

    async fn set_promisc(&self, link: &LinkAttrs, on: bool) -> UplinkResult<()> {
        self.enter("set_promisc", &link.name)?;
        self.update_link(&link.name, |l| l.attrs.promisc_on = on)
    }

    async fn set_mtu(&self, link: &LinkAttrs, mtu: u32) -> UplinkResult<()> {
        self.enter("set_mtu", &link.name)?;
        self.update_link(&link.name, |l| l.attrs.mtu = mtu)
    }

    async fn addresses(&self, link: &LinkAttrs) -> UplinkResult<Vec<InterfaceAddress>> {
        self.enter("addresses", &link.name)?;
        self.root_link(&link.name).map(|l| l.addresses)
    }

    async fn routes(&self, link: &LinkAttrs) -> UplinkResult<Vec<InterfaceRoute>> {
        self.enter("routes", &link.name)?;
        self.root_link(&link.name).map(|l| l.routes)
    }

    async fn add_address(&self, link: &LinkAttrs, address: &InterfaceAddress) -> UplinkResult<()> {
        self.enter("add_address", &link.name)?;
        self.update_link(&link.name, |l| {
            if !l.addresses.contains(address) {
                l.addresses.push(*address);
            }
        })
    }

    async fn add_route(&self, link: &LinkAttrs, route: &InterfaceRoute) -> UplinkResult<()> {
        self.enter("add_route", &link.name)?;
        self.update_link(&link.name, |l| {
            if !l.routes.contains(route) {
                l.routes.push(*route);
            }
        })
    }

    async fn link_exists_in_namespace(&self, name: &str, pid: u32) -> UplinkResult<bool> {
        self.enter("link_exists_in_namespace", name)?;
        Ok(self.link_in_namespace(pid, name).is_some())
    }

    async fn move_link_to_namespace(&self, name: &str, pid: u32) -> UplinkResult<()> {
        self.enter("move_link_to_namespace", name)?;
        let mut host = self.host.lock().unwrap();
        let link = host
            .root
            .remove(name)
            .ok_or_else(|| UplinkError::not_found(name))?;
        host.namespaces
            .entry(pid)
            .or_default()
            .insert(name.to_string(), link.relocated());
        Ok(())
    }

    async fn move_link_from_namespace(&self, name: &str, pid: u32) -> UplinkResult<()> {
        self.enter("move_link_from_namespace", name)?;
        let mut host = self.host.lock().unwrap();
        let link = host
            .namespaces
            .get_mut(&pid)
            .and_then(|ns| ns.remove(name))
            .ok_or_else(|| UplinkError::not_found(name))?;
        host.root.insert(name.to_string(), link.relocated());
        Ok(())
    }

    fn device_info(&self, name: &str) -> DeviceInfo {
        let mut host = self.host.lock().unwrap();
        host.calls.push(format!("device_info {}", name));
        host.root
            .get(name)
            .map(|l| l.device.clone())
            .unwrap_or_default()
    }

    fn kernel_version(&self) -> Option<KernelVersion> {
        self.host.lock().unwrap().kernel_version
    }

    fn driver_loaded(&self, driver: &str) -> bool {
        self.host.lock().unwrap().loaded_drivers.contains(driver)
    }

    fn bind_pci_driver(
        &self,
        interface: &str,
        pci_id: &str,
        driver: Option<&str>,
    ) -> UplinkResult<()> {
        {
            let mut host = self.host.lock().unwrap();
            host.calls.push(format!(
                "bind_pci_driver {} {} {}",
                interface,
                pci_id,
                driver.unwrap_or("<default>")
            ));
            if host.failing.contains("bind_pci_driver") {
                return Err(forced(interface, "bind_pci_driver"));
            }
        }

        let mut host = self.host.lock().unwrap();
        match driver {
            Some(VFIO_PCI_DRIVER) => {
                let name = host
                    .root
                    .iter()
                    .find(|(_, l)| l.device.pci_id.as_deref() == Some(pci_id))
                    .map(|(n, _)| n.clone());
                let link = name.and_then(|n| host.root.remove(&n)).ok_or_else(|| {
                    UplinkError::Sysfs {
                        interface: interface.to_string(),
                        message: format!("no netdev on {}", pci_id),
                    }
                })?;
                host.unbound.insert(pci_id.to_string(), link);
                Ok(())
            }
            Some(other) => Err(UplinkError::Sysfs {
                interface: interface.to_string(),
                message: format!("fake kernel cannot bind {}", other),
            }),
            None => {
                // Back to the kernel driver: a fresh netdev appears
                let link = host
                    .unbound
                    .remove(pci_id)
                    .ok_or_else(|| UplinkError::Sysfs {
                        interface: interface.to_string(),
                        message: format!("{} is not bound to another driver", pci_id),
                    })?;
                host.root.insert(link.attrs.name.clone(), link.relocated());
                Ok(())
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct DataplaneState {
    pub next_index: u32,
    pub fail_create: bool,
    pub fail_tag: bool,
    /// `driver host-interface` per creation request
    pub created: Vec<String>,
    pub tags: Vec<(u32, String)>,
}

/// Dataplane handing out consecutive interface indexes, starting at 1.
#[derive(Debug, Clone)]
pub struct FakeDataplane {
    state: Arc<Mutex<DataplaneState>>,
}

impl Default for FakeDataplane {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDataplane {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DataplaneState {
                next_index: 1,
                ..DataplaneState::default()
            })),
        }
    }

    pub fn with_next_index(self, index: u32) -> Self {
        self.state.lock().unwrap().next_index = index;
        self
    }

    pub fn failing_create(self) -> Self {
        self.state.lock().unwrap().fail_create = true;
        self
    }

    pub fn failing_tag(self) -> Self {
        self.state.lock().unwrap().fail_tag = true;
        self
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn tags(&self) -> Vec<(u32, String)> {
        self.state.lock().unwrap().tags.clone()
    }

    fn create(&self, driver: &str, host_interface: &str) -> DataplaneResult<u32> {
        let mut state = self.state.lock().unwrap();
        let request = format!("{} {}", driver, host_interface);
        if state.fail_create {
            return Err(DataplaneError::RequestFailed {
                request,
                message: "forced failure".to_string(),
            });
        }
        state.created.push(request);
        let index = state.next_index;
        state.next_index += 1;
        Ok(index)
    }
}

impl DataplaneClient for FakeDataplane {
    async fn create_af_packet(&self, intf: &AfPacketInterface) -> DataplaneResult<u32> {
        self.create("af_packet", &intf.generic.host_interface_name)
    }

    async fn create_af_xdp(&self, intf: &AfXdpInterface) -> DataplaneResult<u32> {
        self.create("af_xdp", &intf.generic.host_interface_name)
    }

    async fn create_rdma(&self, intf: &RdmaInterface) -> DataplaneResult<u32> {
        self.create("rdma", &intf.generic.host_interface_name)
    }

    async fn dpdk_interface_index(&self, pci_id: &str) -> DataplaneResult<u32> {
        self.create("dpdk", pci_id)
    }

    async fn tag_interface(&self, sw_if_index: u32, tag: &str) -> DataplaneResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_tag {
            return Err(DataplaneError::InterfaceNotFound(sw_if_index.to_string()));
        }
        state.tags.push((sw_if_index, tag.to_string()));
        Ok(())
    }
}
