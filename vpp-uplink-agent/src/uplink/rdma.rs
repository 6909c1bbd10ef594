//! RDMA uplink driver for Mellanox ConnectX NICs.

use tracing::{info, warn};

use vpp_uplink_shared::DriverKind;
use vpp_uplink_shared::errors::UplinkResult;

use super::{DriverData, RestoreReport, Uplink};
use crate::dataplane::{DataplaneClient, RdmaInterface};
use crate::kernel::Kernel;

/// Kernel driver of the NICs the RDMA plugin can drive.
pub const MLX5_DRIVER: &str = "mlx5_core";

#[derive(Debug)]
pub struct RdmaDriver<K> {
    pub(crate) data: DriverData<K>,
}

impl<K: Kernel> RdmaDriver<K> {
    pub fn new(data: DriverData<K>) -> Self {
        Self { data }
    }
}

impl<K: Kernel> Uplink for RdmaDriver<K> {
    fn is_supported(&self, warn: bool) -> bool {
        let driver = self.data.conf().driver.as_deref();
        if driver == Some(MLX5_DRIVER) {
            return true;
        }
        if warn {
            warn!(
                "RDMA on {} needs the {} driver, interface uses {}",
                self.data.name(),
                MLX5_DRIVER,
                driver.unwrap_or("none")
            );
        }
        false
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

        let intf = RdmaInterface {
            generic: self.data.generic_vpp_interface(),
        };
        let sw_if_index = vpp
            .create_rdma(&intf)
            .await
            .map_err(|e| self.data.create_error(DriverKind::Rdma, e))?;
        info!("Created RDMA interface {}", sw_if_index);

        self.data
            .finish_handover(vpp, DriverKind::Rdma, sw_if_index)
            .await
    }

    async fn restore_linux(&mut self, all_interfaces_physical: bool) -> RestoreReport {
        self.data.restore_relocated(all_interfaces_physical, false).await
    }
}
