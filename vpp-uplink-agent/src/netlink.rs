//! Native netlink implementation of the [`Kernel`] trait.
//!
//! Link, address and route operations in the agent's namespace go through a
//! single rtnetlink connection opened at startup. Operations that must run
//! inside the dataplane's namespace (lookups there, moving links back out)
//! open a short-lived connection on a dedicated namespace thread, see
//! [`crate::netns::run_netlink_in_namespace`].

use std::fs::File;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::fd::AsRawFd;

use futures_util::stream::TryStreamExt;
use netlink_packet_route::AddressFamily;
use netlink_packet_route::address::{AddressAttribute, AddressMessage, AddressScope};
use netlink_packet_route::link::{LinkAttribute, LinkFlags, LinkMessage};
use netlink_packet_route::route::{RouteAddress, RouteAttribute, RouteMessage, RouteProtocol};
use nix::errno::Errno;
use rtnetlink::{Handle, LinkUnspec, RouteMessageBuilder};
use tracing::{debug, info, instrument};

use vpp_uplink_shared::errors::{UplinkError, UplinkResult};
use vpp_uplink_shared::{InterfaceAddress, InterfaceRoute, format_mac};

use crate::kernel::{DeviceInfo, Kernel, KernelVersion, LinkAttrs};
use crate::netns::{NamespaceError, NamespacePath, run_netlink_in_namespace};
use crate::sysfs::Sysfs;

const RT_TABLE_MAIN: u32 = 254;

/// Kernel access over rtnetlink, with sysfs for device information.
#[derive(Clone)]
pub struct RtnetlinkKernel {
    handle: Handle,
    sysfs: Sysfs,
}

impl RtnetlinkKernel {
    /// Opens the netlink connection. Must be called from inside a tokio runtime.
    pub fn new() -> UplinkResult<Self> {
        let (connection, handle, _) =
            rtnetlink::new_connection().map_err(|e| UplinkError::Netlink {
                interface: "*".to_string(),
                operation: "open netlink connection".to_string(),
                message: e.to_string(),
            })?;
        tokio::spawn(connection);

        Ok(Self {
            handle,
            sysfs: Sysfs::default(),
        })
    }

    async fn set_link(&self, link: &LinkAttrs, operation: &str, msg: LinkMessage) -> UplinkResult<()> {
        self.handle
            .link()
            .set(msg)
            .execute()
            .await
            .map_err(|e| map_netlink_error(e, &link.name, operation))
    }
}

/// Looks a link up by name on `handle`.
async fn get_link(handle: &Handle, name: &str) -> UplinkResult<LinkAttrs> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();
    match links.try_next().await {
        Ok(Some(msg)) => Ok(link_attrs(name, msg)),
        Ok(None) => Err(UplinkError::not_found(name)),
        Err(e) => Err(map_netlink_error(e, name, "look up link")),
    }
}

fn link_attrs(name: &str, msg: LinkMessage) -> LinkAttrs {
    let mut attrs = LinkAttrs {
        index: msg.header.index,
        name: name.to_string(),
        is_up: msg.header.flags.contains(LinkFlags::Up),
        promisc_on: msg.header.flags.contains(LinkFlags::Promisc),
        mtu: 0,
        hardware_addr: None,
    };

    for attr in msg.attributes {
        match attr {
            LinkAttribute::IfName(n) => attrs.name = n,
            LinkAttribute::Mtu(mtu) => attrs.mtu = mtu,
            LinkAttribute::Address(bytes) if !bytes.is_empty() => {
                attrs.hardware_addr = Some(format_mac(&bytes))
            }
            _ => {}
        }
    }
    attrs
}

fn errno(err: &rtnetlink::Error) -> Option<i32> {
    match err {
        rtnetlink::Error::NetlinkError(msg) => msg.code.map(|code| code.get().abs()),
        _ => None,
    }
}

/// Maps a netlink error to the uplink error taxonomy.
fn map_netlink_error(err: rtnetlink::Error, interface: &str, operation: &str) -> UplinkError {
    match errno(&err) {
        Some(code) if code == Errno::ENODEV as i32 => UplinkError::not_found(interface),
        Some(code) if code == Errno::EPERM as i32 || code == Errno::EACCES as i32 => {
            UplinkError::Privilege {
                interface: interface.to_string(),
                operation: operation.to_string(),
                message: err.to_string(),
            }
        }
        _ => UplinkError::Netlink {
            interface: interface.to_string(),
            operation: operation.to_string(),
            message: err.to_string(),
        },
    }
}

fn is_exists(err: &rtnetlink::Error) -> bool {
    errno(err) == Some(Errno::EEXIST as i32)
}

fn namespace_error(interface: &str, err: NamespaceError) -> UplinkError {
    match err {
        NamespaceError::EnterNamespace { source, .. }
            if source == Errno::EPERM || source == Errno::EACCES =>
        {
            UplinkError::Privilege {
                interface: interface.to_string(),
                operation: "enter dataplane namespace".to_string(),
                message: source.to_string(),
            }
        }
        other => UplinkError::NamespaceMove {
            interface: interface.to_string(),
            message: other.to_string(),
        },
    }
}

fn interface_address(msg: AddressMessage) -> Option<InterfaceAddress> {
    let mut address = None;
    let mut local = None;
    for attr in msg.attributes {
        match attr {
            AddressAttribute::Address(ip) => address = Some(ip),
            AddressAttribute::Local(ip) => local = Some(ip),
            _ => {}
        }
    }

    // On point-to-point links IFA_ADDRESS is the peer, IFA_LOCAL is ours
    local
        .or(address)
        .map(|ip| InterfaceAddress::new(ip, msg.header.prefix_len))
}

fn route_ip(addr: RouteAddress) -> Option<IpAddr> {
    match addr {
        RouteAddress::Inet(v4) => Some(IpAddr::V4(v4)),
        RouteAddress::Inet6(v6) => Some(IpAddr::V6(v6)),
        _ => None,
    }
}

fn interface_route(msg: RouteMessage, index: u32) -> Option<InterfaceRoute> {
    if msg.header.protocol == RouteProtocol::Kernel {
        return None;
    }

    let mut table = u32::from(msg.header.table);
    let mut oif = None;
    let mut destination = None;
    let mut gateway = None;
    let mut priority = None;
    for attr in msg.attributes {
        match attr {
            RouteAttribute::Table(t) => table = t,
            RouteAttribute::Oif(i) => oif = Some(i),
            RouteAttribute::Destination(addr) => destination = route_ip(addr),
            RouteAttribute::Gateway(addr) => gateway = route_ip(addr),
            RouteAttribute::Priority(p) => priority = Some(p),
            _ => {}
        }
    }

    if table != RT_TABLE_MAIN || oif != Some(index) {
        return None;
    }

    let destination = destination.unwrap_or(match msg.header.address_family {
        AddressFamily::Inet6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    });

    Some(InterfaceRoute {
        destination,
        prefix_len: msg.header.destination_prefix_length,
        gateway,
        priority,
    })
}

fn route_message(link: &LinkAttrs, route: &InterfaceRoute) -> UplinkResult<RouteMessage> {
    let mismatch = || UplinkError::Netlink {
        interface: link.name.clone(),
        operation: format!("add route {}", route),
        message: "gateway and destination address families differ".to_string(),
    };

    let msg = match route.destination {
        IpAddr::V4(dst) => {
            let mut builder = RouteMessageBuilder::<Ipv4Addr>::default()
                .destination_prefix(dst, route.prefix_len)
                .output_interface(link.index);
            match route.gateway {
                Some(IpAddr::V4(gw)) => builder = builder.gateway(gw),
                Some(IpAddr::V6(_)) => return Err(mismatch()),
                None => {}
            }
            if let Some(priority) = route.priority {
                builder = builder.priority(priority);
            }
            builder.build()
        }
        IpAddr::V6(dst) => {
            let mut builder = RouteMessageBuilder::<Ipv6Addr>::default()
                .destination_prefix(dst, route.prefix_len)
                .output_interface(link.index);
            match route.gateway {
                Some(IpAddr::V6(gw)) => builder = builder.gateway(gw),
                Some(IpAddr::V4(_)) => return Err(mismatch()),
                None => {}
            }
            if let Some(priority) = route.priority {
                builder = builder.priority(priority);
            }
            builder.build()
        }
    };
    Ok(msg)
}

impl Kernel for RtnetlinkKernel {
    #[instrument(skip(self))]
    async fn link_by_name(&self, name: &str) -> UplinkResult<LinkAttrs> {
        get_link(&self.handle, name).await
    }

    async fn set_link_up(&self, link: &LinkAttrs) -> UplinkResult<()> {
        let msg = LinkUnspec::new_with_index(link.index).up().build();
        self.set_link(link, "set link up", msg).await
    }

    async fn set_link_down(&self, link: &LinkAttrs) -> UplinkResult<()> {
        let msg = LinkUnspec::new_with_index(link.index).down().build();
        self.set_link(link, "set link down", msg).await
    }

    async fn set_promisc(&self, link: &LinkAttrs, on: bool) -> UplinkResult<()> {
        let msg = LinkUnspec::new_with_index(link.index).promiscuous(on).build();
        let operation = if on { "set promisc on" } else { "set promisc off" };
        self.set_link(link, operation, msg).await
    }

    async fn set_mtu(&self, link: &LinkAttrs, mtu: u32) -> UplinkResult<()> {
        let msg = LinkUnspec::new_with_index(link.index).mtu(mtu).build();
        self.set_link(link, &format!("set mtu {}", mtu), msg).await
    }

    async fn addresses(&self, link: &LinkAttrs) -> UplinkResult<Vec<InterfaceAddress>> {
        let mut stream = self
            .handle
            .address()
            .get()
            .set_link_index_filter(link.index)
            .execute();

        let mut addresses = Vec::new();
        while let Some(msg) = stream
            .try_next()
            .await
            .map_err(|e| map_netlink_error(e, &link.name, "list addresses"))?
        {
            if msg.header.index != link.index {
                continue;
            }
            if let Some(addr) = interface_address(msg) {
                addresses.push(addr);
            }
        }
        Ok(addresses)
    }

    async fn routes(&self, link: &LinkAttrs) -> UplinkResult<Vec<InterfaceRoute>> {
        let mut routes = Vec::new();
        let requests = [
            RouteMessageBuilder::<Ipv4Addr>::default().build(),
            RouteMessageBuilder::<Ipv6Addr>::default().build(),
        ];

        for request in requests {
            let mut stream = self.handle.route().get(request).execute();
            while let Some(msg) = stream
                .try_next()
                .await
                .map_err(|e| map_netlink_error(e, &link.name, "list routes"))?
            {
                if let Some(route) = interface_route(msg, link.index) {
                    routes.push(route);
                }
            }
        }
        Ok(routes)
    }

    async fn add_address(&self, link: &LinkAttrs, address: &InterfaceAddress) -> UplinkResult<()> {
        match self
            .handle
            .address()
            .add(link.index, address.address, address.prefix_len)
            .execute()
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_exists(&e) => {
                debug!("Address {} already present on {}", address, link.name);
                Ok(())
            }
            Err(e) => Err(map_netlink_error(
                e,
                &link.name,
                &format!("add address {}", address),
            )),
        }
    }

    async fn add_route(&self, link: &LinkAttrs, route: &InterfaceRoute) -> UplinkResult<()> {
        let msg = route_message(link, route)?;
        match self.handle.route().add(msg).execute().await {
            Ok(()) => Ok(()),
            Err(e) if is_exists(&e) => {
                debug!("Route {} already present on {}", route, link.name);
                Ok(())
            }
            Err(e) => Err(map_netlink_error(
                e,
                &link.name,
                &format!("add route {}", route),
            )),
        }
    }

    async fn link_exists_in_namespace(&self, name: &str, pid: u32) -> UplinkResult<bool> {
        let target = name.to_string();
        let found = run_netlink_in_namespace(NamespacePath::Pid(pid), move |handle| async move {
            match get_link(&handle, &target).await {
                Ok(_) => Ok(true),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(|e| namespace_error(name, e))?;
        found
    }

    #[instrument(skip(self))]
    async fn move_link_to_namespace(&self, name: &str, pid: u32) -> UplinkResult<()> {
        let link = get_link(&self.handle, name).await?;
        let msg = LinkUnspec::new_with_index(link.index).setns_by_pid(pid).build();
        self.set_link(&link, "move link into dataplane namespace", msg)
            .await?;
        info!("Moved {} into namespace of pid {}", name, pid);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn move_link_from_namespace(&self, name: &str, pid: u32) -> UplinkResult<()> {
        let own_ns = File::open("/proc/self/ns/net").map_err(|e| UplinkError::NamespaceMove {
            interface: name.to_string(),
            message: format!("Failed to open own namespace: {}", e),
        })?;

        let target = name.to_string();
        let moved = run_netlink_in_namespace(NamespacePath::Pid(pid), move |handle| async move {
            let link = get_link(&handle, &target).await?;
            let msg = LinkUnspec::new_with_index(link.index)
                .setns_by_fd(own_ns.as_raw_fd())
                .build();
            let result = handle
                .link()
                .set(msg)
                .execute()
                .await
                .map_err(|e| map_netlink_error(e, &target, "move link out of dataplane namespace"));
            drop(own_ns);
            result
        })
        .await
        .map_err(|e| namespace_error(name, e))?;

        moved?;
        info!("Moved {} back from namespace of pid {}", name, pid);
        Ok(())
    }

    fn device_info(&self, name: &str) -> DeviceInfo {
        self.sysfs.device_info(name)
    }

    fn kernel_version(&self) -> Option<KernelVersion> {
        self.sysfs.kernel_version()
    }

    fn driver_loaded(&self, driver: &str) -> bool {
        self.sysfs.driver_loaded(driver)
    }

    fn bind_pci_driver(
        &self,
        interface: &str,
        pci_id: &str,
        driver: Option<&str>,
    ) -> UplinkResult<()> {
        self.sysfs
            .bind_pci_driver(pci_id, driver)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => UplinkError::Privilege {
                    interface: interface.to_string(),
                    operation: format!("rebind PCI device {}", pci_id),
                    message: e.to_string(),
                },
                _ => UplinkError::Sysfs {
                    interface: interface.to_string(),
                    message: format!("Failed to rebind PCI device {}: {}", pci_id, e),
                },
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netlink_packet_route::route::RouteHeader;

    // Reading another process's root requires privileges
    fn is_root() -> bool {
        std::fs::metadata("/proc/1/root").is_ok()
    }

    #[test]
    fn test_link_attrs_from_message() {
        let mut msg = LinkMessage::default();
        msg.header.index = 3;
        msg.header.flags = LinkFlags::Up | LinkFlags::Promisc;
        msg.attributes.push(LinkAttribute::IfName("eth0".to_string()));
        msg.attributes.push(LinkAttribute::Mtu(9000));
        msg.attributes
            .push(LinkAttribute::Address(vec![0x02, 0x42, 0xac, 0x11, 0x00, 0x02]));

        let attrs = link_attrs("eth0", msg);
        assert_eq!(attrs.index, 3);
        assert!(attrs.is_up);
        assert!(attrs.promisc_on);
        assert_eq!(attrs.mtu, 9000);
        assert_eq!(attrs.hardware_addr.as_deref(), Some("02:42:ac:11:00:02"));
    }

    #[test]
    fn test_address_of_any_scope_is_reported() {
        let mut msg = AddressMessage::default();
        msg.header.prefix_len = 16;
        msg.header.scope = AddressScope::Link;
        msg.attributes
            .push(AddressAttribute::Address("169.254.10.1".parse().unwrap()));
        assert_eq!(
            interface_address(msg),
            Some(InterfaceAddress::new("169.254.10.1".parse().unwrap(), 16))
        );

        let mut msg = AddressMessage::default();
        msg.header.prefix_len = 24;
        msg.header.scope = AddressScope::Universe;
        msg.attributes
            .push(AddressAttribute::Address("10.0.0.5".parse().unwrap()));
        assert_eq!(
            interface_address(msg),
            Some(InterfaceAddress::new("10.0.0.5".parse().unwrap(), 24))
        );
    }

    fn route(protocol: RouteProtocol, oif: u32) -> RouteMessage {
        let mut msg = RouteMessage::default();
        msg.header = RouteHeader {
            address_family: AddressFamily::Inet,
            table: RT_TABLE_MAIN as u8,
            protocol,
            ..Default::default()
        };
        msg.attributes.push(RouteAttribute::Oif(oif));
        msg.attributes.push(RouteAttribute::Gateway(RouteAddress::Inet(
            Ipv4Addr::new(10, 0, 0, 1),
        )));
        msg
    }

    #[test]
    fn test_default_route_conversion() {
        let converted = interface_route(route(RouteProtocol::Boot, 2), 2);
        assert_eq!(
            converted,
            Some(InterfaceRoute::default_v4(Ipv4Addr::new(10, 0, 0, 1)))
        );
    }

    #[test]
    fn test_kernel_and_foreign_routes_skipped() {
        assert_eq!(interface_route(route(RouteProtocol::Kernel, 2), 2), None);
        assert_eq!(interface_route(route(RouteProtocol::Boot, 5), 2), None);
    }

    #[test]
    fn test_route_message_rejects_mixed_families() {
        let link = LinkAttrs {
            index: 2,
            name: "eth0".to_string(),
            is_up: true,
            promisc_on: false,
            mtu: 1500,
            hardware_addr: None,
        };
        let bad = InterfaceRoute {
            destination: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            prefix_len: 0,
            gateway: Some("fe80::1".parse().unwrap()),
            priority: None,
        };
        assert!(route_message(&link, &bad).is_err());
        assert!(route_message(&link, &InterfaceRoute::default_v4(Ipv4Addr::new(10, 0, 0, 1))).is_ok());
    }

    #[tokio::test]
    async fn test_lookup_loopback() {
        let kernel = RtnetlinkKernel::new().unwrap();
        let lo = kernel.link_by_name("lo").await.unwrap();
        assert_eq!(lo.index, 1);
        assert!(lo.is_up);
    }

    #[tokio::test]
    async fn test_lookup_missing_link() {
        let kernel = RtnetlinkKernel::new().unwrap();
        let err = kernel.link_by_name("doesnotexist").await.unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_link_exists_in_own_namespace() {
        if !is_root() {
            eprintln!("Skipping test - requires root");
            return;
        }
        let kernel = RtnetlinkKernel::new().unwrap();
        let pid = std::process::id();
        assert!(kernel.link_exists_in_namespace("lo", pid).await.unwrap());
        assert!(!kernel
            .link_exists_in_namespace("doesnotexist", pid)
            .await
            .unwrap());
    }
}
