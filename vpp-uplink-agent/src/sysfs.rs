//! Sysfs and procfs readers for NIC device information.
//!
//! Covers what netlink does not expose: the bound driver, the PCI address
//! behind a netdev, the running kernel release, and PCI driver rebinding
//! through `driver_override`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::kernel::{DeviceInfo, KernelVersion};

static PCI_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{4}:[0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-7]$")
        .expect("PCI address pattern is valid")
});

/// Sysfs/procfs access rooted at a configurable directory.
#[derive(Debug, Clone)]
pub struct Sysfs {
    root: PathBuf,
}

impl Default for Sysfs {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Sysfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    fn net_device(&self, interface: &str) -> PathBuf {
        self.path(format!("sys/class/net/{}/device", interface))
    }

    fn pci_device(&self, pci_id: &str) -> PathBuf {
        self.path(format!("sys/bus/pci/devices/{}", pci_id))
    }

    /// Driver and PCI address behind a network interface.
    ///
    /// Virtual interfaces have no `device` link and yield an empty
    /// [`DeviceInfo`]. Virtio NICs hang off a `virtioN` node whose parent is
    /// the PCI function.
    pub fn device_info(&self, interface: &str) -> DeviceInfo {
        let device = self.net_device(interface);

        let driver = fs::read_link(device.join("driver"))
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));

        let pci_id = fs::canonicalize(&device).ok().and_then(|mut path| {
            let is_virtio = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with("virtio"));
            if is_virtio {
                path.pop();
            }
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .filter(|n| PCI_ADDRESS.is_match(n))
        });

        debug!(
            "Device info for {}: driver={:?} pci={:?}",
            interface, driver, pci_id
        );
        DeviceInfo { driver, pci_id }
    }

    pub fn kernel_version(&self) -> Option<KernelVersion> {
        fs::read_to_string(self.path("proc/sys/kernel/osrelease"))
            .ok()
            .and_then(|release| KernelVersion::parse(&release))
    }

    pub fn driver_loaded(&self, driver: &str) -> bool {
        self.path(format!("sys/bus/pci/drivers/{}", driver)).is_dir()
    }

    /// Unbinds the device from its current driver, sets `driver_override`
    /// and asks the kernel to probe it again.
    pub fn bind_pci_driver(&self, pci_id: &str, driver: Option<&str>) -> io::Result<()> {
        let device = self.pci_device(pci_id);
        if !device.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("PCI device {} not found", pci_id),
            ));
        }

        let current = device.join("driver");
        if current.exists() {
            debug!("Unbinding {} from its current driver", pci_id);
            fs::write(current.join("unbind"), pci_id)?;
        }

        // An empty override (a lone newline) clears it
        let override_value = driver.map(str::to_string).unwrap_or_else(|| "\n".to_string());
        fs::write(device.join("driver_override"), override_value)?;
        fs::write(self.path("sys/bus/pci/drivers_probe"), pci_id)?;

        info!(
            "Rebound PCI device {} to {}",
            pci_id,
            driver.unwrap_or("its default driver")
        );
        Ok(())
    }
}
