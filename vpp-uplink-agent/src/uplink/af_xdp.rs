//! AF_XDP uplink driver.
//!
//! Zero-copy sockets on the NIC queues. Needs a kernel with AF_XDP support
//! and an MTU that fits into a single XDP frame.

use tracing::{info, warn};

use vpp_uplink_shared::DriverKind;
use vpp_uplink_shared::errors::UplinkResult;

use super::{DriverData, RestoreReport, Uplink};
use crate::dataplane::{AfXdpInterface, DataplaneClient};
use crate::kernel::{Kernel, KernelVersion};

/// Largest MTU an XDP frame can carry.
pub const MAX_AF_XDP_MTU: u32 = 3072;

/// First kernel release with usable AF_XDP.
pub const MIN_AF_XDP_KERNEL: KernelVersion = KernelVersion::new(5, 4);

#[derive(Debug)]
pub struct AfXdpDriver<K> {
    pub(crate) data: DriverData<K>,
}

impl<K: Kernel> AfXdpDriver<K> {
    pub fn new(data: DriverData<K>) -> Self {
        Self { data }
    }

    fn effective_mtu(&self) -> u32 {
        self.data.spec().mtu.unwrap_or(self.data.conf().mtu)
    }
}

impl<K: Kernel> Uplink for AfXdpDriver<K> {
    fn is_supported(&self, warn: bool) -> bool {
        match self.data.host().kernel_version {
            Some(version) if version >= MIN_AF_XDP_KERNEL => {}
            Some(version) => {
                if warn {
                    warn!(
                        "AF_XDP on {} needs kernel >= {}, running {}",
                        self.data.name(),
                        MIN_AF_XDP_KERNEL,
                        version
                    );
                }
                return false;
            }
            None => {
                if warn {
                    warn!("Kernel version unknown, not using AF_XDP on {}", self.data.name());
                }
                return false;
            }
        }

        let mtu = self.effective_mtu();
        if mtu > MAX_AF_XDP_MTU {
            if warn {
                warn!(
                    "AF_XDP on {} supports MTU up to {}, interface has {}",
                    self.data.name(),
                    MAX_AF_XDP_MTU,
                    mtu
                );
            }
            return false;
        }
        true
    }

    async fn preconfigure_linux(&mut self) -> UplinkResult<()> {
        let link = self.data.lookup_link().await?;
        self.data.kernel().set_promisc(&link, true).await?;

        if let Some(mtu) = self.data.spec().mtu {
            if mtu != link.mtu {
                info!("Setting MTU of {} to {}", self.data.name(), mtu);
                self.data.kernel().set_mtu(&link, mtu).await?;
            }
        }
        Ok(())
    }

    async fn create_main_vpp_interface<V: DataplaneClient>(
        &mut self,
        vpp: &V,
        vpp_pid: u32,
    ) -> UplinkResult<u32> {
        self.data.move_interface_to_ns(vpp_pid).await?;

        let intf = AfXdpInterface {
            generic: self.data.generic_vpp_interface(),
        };
        let sw_if_index = vpp
            .create_af_xdp(&intf)
            .await
            .map_err(|e| self.data.create_error(DriverKind::AfXdp, e))?;
        info!("Created AF_XDP interface {}", sw_if_index);

        self.data
            .finish_handover(vpp, DriverKind::AfXdp, sw_if_index)
            .await
    }

    async fn restore_linux(&mut self, all_interfaces_physical: bool) -> RestoreReport {
        self.data.restore_relocated(all_interfaces_physical, true).await
    }
}
