//! On-disk record of uplinks handed to the dataplane.
//!
//! Written before any interface is mutated and removed once every uplink has
//! been restored. If the agent dies in between, the next run finds the file
//! and restores the interfaces it describes before doing anything else.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use vpp_uplink_shared::{DriverKind, InterfaceSpec, LinuxInterfaceState};

/// One uplink as the controller knew it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedUplink {
    pub spec: InterfaceSpec,
    pub driver: DriverKind,
    pub state: LinuxInterfaceState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UplinkStateFile {
    /// Dataplane the uplinks were handed to, once handover started
    pub vpp_pid: Option<u32>,
    pub uplinks: Vec<PersistedUplink>,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file, `None` when there is none.
    pub fn load(&self) -> Result<Option<UplinkStateFile>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read uplink state {}", self.path.display()))?;
        let file = serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse uplink state {}", self.path.display()))?;
        Ok(Some(file))
    }

    /// Replaces the file atomically.
    pub fn save(&self, file: &UplinkStateFile) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let data = serde_json::to_vec_pretty(file)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data)
            .with_context(|| format!("Failed to write uplink state {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| {
            format!("Failed to move uplink state into {}", self.path.display())
        })?;

        debug!(
            "Saved state of {} uplinks to {}",
            file.uplinks.len(),
            self.path.display()
        );
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove uplink state {}", self.path.display())),
        }
    }
}
