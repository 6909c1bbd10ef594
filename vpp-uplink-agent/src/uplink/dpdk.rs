//! DPDK uplink driver.
//!
//! The PCI device is unbound from its kernel driver and bound to `vfio-pci`,
//! so the kernel netdev disappears while the dataplane owns the port. The
//! interface never changes namespace. Restoration clears the driver override,
//! which lets the kernel re-probe its original driver and recreate the netdev.

use tracing::{info, warn};

use vpp_uplink_shared::DriverKind;
use vpp_uplink_shared::errors::{UplinkError, UplinkResult};

use super::{DriverData, RestoreReport, RestoreStep, Uplink};
use crate::dataplane::DataplaneClient;
use crate::kernel::{Kernel, VFIO_PCI_DRIVER};

#[derive(Debug)]
pub struct DpdkDriver<K> {
    pub(crate) data: DriverData<K>,
}

impl<K: Kernel> DpdkDriver<K> {
    pub fn new(data: DriverData<K>) -> Self {
        Self { data }
    }

    fn pci_id(&self) -> UplinkResult<&str> {
        self.data
            .conf()
            .pci_id
            .as_deref()
            .ok_or_else(|| UplinkError::UnsupportedDriver {
                interface: self.data.name().to_string(),
                driver: DriverKind::Dpdk,
            })
    }
}

impl<K: Kernel> Uplink for DpdkDriver<K> {
    fn is_supported(&self, warn: bool) -> bool {
        if self.data.conf().pci_id.is_none() {
            if warn {
                warn!("DPDK needs a PCI device, {} has none", self.data.name());
            }
            return false;
        }
        if !self.data.host().vfio_pci_loaded {
            if warn {
                warn!(
                    "DPDK on {} needs the {} driver, which is not loaded",
                    self.data.name(),
                    VFIO_PCI_DRIVER
                );
            }
            return false;
        }
        true
    }

    async fn preconfigure_linux(&mut self) -> UplinkResult<()> {
        let link = self.data.lookup_link().await?;
        let pci_id = self.pci_id()?.to_string();

        if link.is_up {
            self.data.kernel().set_link_down(&link).await?;
        }
        self.data
            .kernel()
            .bind_pci_driver(self.data.name(), &pci_id, Some(VFIO_PCI_DRIVER))
    }

    async fn create_main_vpp_interface<V: DataplaneClient>(
        &mut self,
        vpp: &V,
        _vpp_pid: u32,
    ) -> UplinkResult<u32> {
        let pci_id = self.pci_id()?.to_string();
        let sw_if_index = vpp
            .dpdk_interface_index(&pci_id)
            .await
            .map_err(|e| self.data.create_error(DriverKind::Dpdk, e))?;
        info!("DPDK claimed {} as interface {}", pci_id, sw_if_index);

        self.data
            .finish_handover(vpp, DriverKind::Dpdk, sw_if_index)
            .await
    }

    async fn restore_linux(&mut self, _all_interfaces_physical: bool) -> RestoreReport {
        let mut report = RestoreReport::new(self.data.name());

        let rebound = match self.pci_id() {
            Ok(pci_id) => self.data.kernel().bind_pci_driver(self.data.name(), pci_id, None),
            Err(e) => Err(e),
        };
        if report.record(RestoreStep::RebindKernelDriver, rebound) {
            let reappeared = self.data.wait_for_interface().await.map(|_| ());
            report.record(RestoreStep::WaitForInterface, reappeared);
        }

        self.data.restore_link_state(&mut report, false).await;
        report
    }
}
