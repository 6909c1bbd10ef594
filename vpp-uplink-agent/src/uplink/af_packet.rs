//! AF_PACKET uplink driver.
//!
//! The dataplane opens a packet socket on the kernel interface, which works
//! on any link but needs the interface in promiscuous mode and inside the
//! dataplane's namespace.

use tracing::info;

use vpp_uplink_shared::DriverKind;
use vpp_uplink_shared::errors::UplinkResult;

use super::{DriverData, RestoreReport, Uplink};
use crate::dataplane::{AfPacketInterface, DataplaneClient};
use crate::kernel::Kernel;

#[derive(Debug)]
pub struct AfPacketDriver<K> {
    pub(crate) data: DriverData<K>,
}

impl<K: Kernel> AfPacketDriver<K> {
    pub fn new(data: DriverData<K>) -> Self {
        Self { data }
    }
}

impl<K: Kernel> Uplink for AfPacketDriver<K> {
    fn is_supported(&self, _warn: bool) -> bool {
        true
    }

    async fn preconfigure_linux(&mut self) -> UplinkResult<()> {
        let link = self.data.lookup_link().await?;
        self.data.kernel().set_promisc(&link, true).await
    }

    async fn create_main_vpp_interface<V: DataplaneClient>(
        &mut self,
        vpp: &V,
        vpp_pid: u32,
    ) -> UplinkResult<u32> {
        self.data.move_interface_to_ns(vpp_pid).await?;

        let intf = AfPacketInterface {
            generic: self.data.generic_vpp_interface(),
        };
        let sw_if_index = vpp
            .create_af_packet(&intf)
            .await
            .map_err(|e| self.data.create_error(DriverKind::AfPacket, e))?;
        info!("Created AF_PACKET interface {}", sw_if_index);

        self.data
            .finish_handover(vpp, DriverKind::AfPacket, sw_if_index)
            .await
    }

    async fn restore_linux(&mut self, all_interfaces_physical: bool) -> RestoreReport {
        self.data.restore_relocated(all_interfaces_physical, false).await
    }
}
