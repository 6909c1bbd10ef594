//! Uplink lifecycle controller.
//!
//! Drives every configured uplink through
//! `Unconfigured -> PreConfigured -> DataplaneOwned -> Restoring -> Restored`,
//! strictly one interface at a time and in configuration order. Any failure
//! on the way to `DataplaneOwned` is fatal: every interface touched so far is
//! restored before the error is returned.

use tracing::{error, info, instrument, warn};

use vpp_uplink_shared::errors::UplinkResult;
use vpp_uplink_shared::{DriverKind, InterfaceSpec};

use crate::dataplane::DataplaneClient;
use crate::inspector;
use crate::kernel::{HostInfo, Kernel};
use crate::state_store::{PersistedUplink, StateStore, UplinkStateFile};
use crate::uplink::{DriverData, RestoreReport, RestoreStep, Uplink, UplinkDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkPhase {
    Unconfigured,
    PreConfigured,
    DataplaneOwned,
    Restoring,
    Restored,
}

/// What the controller knows about one managed uplink.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverRuntimeRecord {
    pub interface_name: String,
    pub driver: DriverKind,
    /// Set only while the dataplane owns the interface
    pub sw_if_index: Option<u32>,
    pub is_main: bool,
    pub phase: UplinkPhase,
}

#[derive(Debug)]
struct ManagedUplink<K> {
    driver: UplinkDriver<K>,
    phase: UplinkPhase,
}

pub struct UplinkController<K, V> {
    kernel: K,
    vpp: V,
    specs: Vec<InterfaceSpec>,
    store: StateStore,
    host: HostInfo,
    vpp_pid: Option<u32>,
    uplinks: Vec<ManagedUplink<K>>,
}

impl<K: Kernel, V: DataplaneClient> UplinkController<K, V> {
    pub fn new(kernel: K, vpp: V, specs: Vec<InterfaceSpec>, store: StateStore) -> Self {
        let host = HostInfo::probe(&kernel);
        info!(
            "Host: kernel {} vfio-pci {}",
            host.kernel_version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            if host.vfio_pci_loaded { "loaded" } else { "not loaded" }
        );

        Self {
            kernel,
            vpp,
            specs,
            store,
            host,
            vpp_pid: None,
            uplinks: Vec::new(),
        }
    }

    pub fn records(&self) -> Vec<DriverRuntimeRecord> {
        self.uplinks
            .iter()
            .map(|u| {
                let data = u.driver.data();
                DriverRuntimeRecord {
                    interface_name: data.name().to_string(),
                    driver: u.driver.kind(),
                    sw_if_index: data.sw_if_index(),
                    is_main: data.spec().is_main,
                    phase: u.phase,
                }
            })
            .collect()
    }

    pub fn phase(&self, interface_name: &str) -> Option<UplinkPhase> {
        self.uplinks
            .iter()
            .find(|u| u.driver.data().name() == interface_name)
            .map(|u| u.phase)
    }

    /// True when every managed uplink is a bare PCI device. Such devices
    /// return to the root namespace by themselves when the dataplane exits.
    pub fn all_interfaces_physical(&self) -> bool {
        !self.uplinks.is_empty()
            && self
                .uplinks
                .iter()
                .all(|u| u.driver.data().conf().is_physical())
    }

    fn persist(&self) {
        let file = UplinkStateFile {
            vpp_pid: self.vpp_pid,
            uplinks: self
                .uplinks
                .iter()
                .map(|u| PersistedUplink {
                    spec: u.driver.data().spec().clone(),
                    driver: u.driver.kind(),
                    state: u.driver.data().conf().clone(),
                })
                .collect(),
        };
        if let Err(e) = self.store.save(&file) {
            warn!("Could not persist uplink state, crash recovery disabled: {:#}", e);
        }
    }

    fn clear_state(&self) {
        if let Err(e) = self.store.clear() {
            warn!("Could not remove uplink state file: {:#}", e);
        }
    }

    /// Restores uplinks left behind by a previous agent that did not shut
    /// down cleanly. Returns one report per recovered uplink.
    #[instrument(skip(self))]
    pub async fn recover_from_crash(&mut self) -> Vec<RestoreReport> {
        let file = match self.store.load() {
            Ok(Some(file)) => file,
            Ok(None) => return Vec::new(),
            Err(e) => {
                error!("Ignoring unreadable uplink state: {:#}", e);
                self.clear_state();
                return Vec::new();
            }
        };

        warn!(
            "Found uplink state of a previous run at {}, restoring {} uplinks",
            self.store.path().display(),
            file.uplinks.len()
        );

        let all_physical =
            !file.uplinks.is_empty() && file.uplinks.iter().all(|u| u.state.is_physical());

        let mut reports = Vec::new();
        for uplink in file.uplinks {
            let data = DriverData::recovered(
                self.kernel.clone(),
                uplink.spec,
                uplink.state,
                file.vpp_pid,
            );
            let mut driver = UplinkDriver::new(uplink.driver, data);
            let report = driver.restore_linux(all_physical).await;
            info!("Recovered {}", report);
            reports.push(report);
        }

        self.clear_state();
        reports
    }

    /// Captures, selects a driver for and pre-configures every uplink.
    #[instrument(skip(self))]
    pub async fn configure(&mut self) -> UplinkResult<()> {
        for spec in self.specs.clone() {
            if let Err(e) = self.configure_one(spec).await {
                error!("Pre-configuration failed: {}", e);
                self.rollback().await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn configure_one(&mut self, spec: InterfaceSpec) -> UplinkResult<()> {
        info!("Configuring uplink {}", spec.interface_name);

        // Lookup and selection failures leave the interface untouched
        let conf = inspector::capture(&self.kernel, &spec.interface_name).await?;
        let data = DriverData::new(self.kernel.clone(), spec, conf, self.host.clone());
        let driver = UplinkDriver::select(data)?;

        self.uplinks.push(ManagedUplink {
            driver,
            phase: UplinkPhase::Unconfigured,
        });
        self.persist();

        let Some(uplink) = self.uplinks.last_mut() else {
            return Ok(());
        };
        uplink.driver.preconfigure_linux().await?;
        uplink.phase = UplinkPhase::PreConfigured;
        Ok(())
    }

    /// Hands every pre-configured uplink to the dataplane of `vpp_pid`.
    #[instrument(skip(self))]
    pub async fn hand_over(&mut self, vpp_pid: u32) -> UplinkResult<()> {
        self.vpp_pid = Some(vpp_pid);
        self.persist();

        let mut failure = None;
        for uplink in self.uplinks.iter_mut() {
            if uplink.phase != UplinkPhase::PreConfigured {
                continue;
            }
            match uplink
                .driver
                .create_main_vpp_interface(&self.vpp, vpp_pid)
                .await
            {
                Ok(sw_if_index) => {
                    info!(
                        "{} handed to the dataplane as {} interface {}",
                        uplink.driver.data().name(),
                        uplink.driver.kind(),
                        sw_if_index
                    );
                    uplink.phase = UplinkPhase::DataplaneOwned;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            error!("Handover failed: {}", e);
            self.rollback().await;
            return Err(e);
        }
        Ok(())
    }

    /// Full startup sequence.
    pub async fn start(&mut self, vpp_pid: u32) -> UplinkResult<()> {
        self.configure().await?;
        self.hand_over(vpp_pid).await
    }

    /// Restores every uplink while the dataplane is still running, so even
    /// physical interfaces are moved back explicitly.
    pub async fn rollback(&mut self) -> Vec<RestoreReport> {
        warn!("Rolling back {} uplinks", self.uplinks.len());
        self.restore_uplinks(false).await
    }

    /// Restores every uplink not restored yet, once the dataplane is gone.
    /// Never fails; the reports list what could not be undone.
    #[instrument(skip(self))]
    pub async fn restore_all(&mut self) -> Vec<RestoreReport> {
        let all_physical = self.all_interfaces_physical();
        self.restore_uplinks(all_physical).await
    }

    async fn restore_uplinks(&mut self, all_physical: bool) -> Vec<RestoreReport> {
        let mut reports = Vec::new();

        for uplink in self.uplinks.iter_mut() {
            if uplink.phase == UplinkPhase::Restored {
                continue;
            }
            uplink.phase = UplinkPhase::Restoring;
            let report = uplink.driver.restore_linux(all_physical).await;
            uplink.phase = UplinkPhase::Restored;

            if report.is_clean() {
                info!("Restored {}", report);
            } else {
                warn!("Restored with errors {}", report);
            }
            reports.push(report);
        }

        // An interface stranded in the dataplane namespace is left for crash recovery
        if reports.iter().any(|r| r.failed(&RestoreStep::MoveFromNamespace)) {
            warn!(
                "Keeping uplink state at {} for the next start",
                self.store.path().display()
            );
        } else {
            self.clear_state();
        }
        reports
    }
}
