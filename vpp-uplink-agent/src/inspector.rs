//! Linux interface inspector.
//!
//! Captures the kernel-side state of an uplink before it is handed to the
//! dataplane. The snapshot is the reference the drivers restore from.

use std::net::IpAddr;

use tracing::{debug, info, instrument};

use vpp_uplink_shared::LinuxInterfaceState;
use vpp_uplink_shared::errors::UplinkResult;

use crate::kernel::Kernel;

/// IPv6 link-local addresses are regenerated by the kernel and never
/// captured. IPv4 169.254/16 addresses are configured by someone and kept.
fn is_link_local(ip: &IpAddr) -> bool {
    matches!(ip, IpAddr::V6(v6) if v6.is_unicast_link_local())
}

/// Reads link attributes, addresses, routes and device information for
/// `interface_name`.
///
/// Fails with `InterfaceNotFound` when no such link exists. The snapshot is
/// assembled from separate queries and is therefore not atomic against a
/// concurrent reconfiguration.
#[instrument(skip(kernel))]
pub async fn capture<K: Kernel>(kernel: &K, interface_name: &str) -> UplinkResult<LinuxInterfaceState> {
    let link = kernel.link_by_name(interface_name).await?;

    let addresses = kernel
        .addresses(&link)
        .await?
        .into_iter()
        .filter(|addr| !is_link_local(&addr.address))
        .collect::<Vec<_>>();
    let routes = kernel.routes(&link).await?;
    let device = kernel.device_info(interface_name);

    let state = LinuxInterfaceState {
        interface_name: interface_name.to_string(),
        index: link.index,
        is_up: link.is_up,
        promisc_on: link.promisc_on,
        mtu: link.mtu,
        hardware_addr: link.hardware_addr,
        driver: device.driver,
        pci_id: device.pci_id,
        addresses,
        routes,
    };

    info!(
        "Captured {}: index={} up={} promisc={} mtu={} driver={:?} pci={:?}",
        state.interface_name,
        state.index,
        state.is_up,
        state.promisc_on,
        state.mtu,
        state.driver,
        state.pci_id
    );
    for addr in &state.addresses {
        debug!("  address {}", addr);
    }
    for route in &state.routes {
        debug!("  route {}", route);
    }

    Ok(state)
}
