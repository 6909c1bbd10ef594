//! CNI per-pod interface state store.
//!
//! The CNI server persists one record per pod interface it wired into the
//! dataplane, so a restarted agent can find them again. The file is a
//! versioned JSON document; the version is also appended to the file name so
//! an agent upgrade never reads a layout it does not understand.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::paths::CNI_SERVER_STATE_FILE;

/// Bumped whenever [`PodState`] changes shape.
pub const CNI_SERVER_STATE_FILE_VERSION: u32 = 5;

/// Default location of the store for the current version.
pub fn default_state_file() -> PathBuf {
    PathBuf::from(format!(
        "{}{}",
        CNI_SERVER_STATE_FILE, CNI_SERVER_STATE_FILE_VERSION
    ))
}

/// Interface state of one pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodState {
    pub pod_name: String,
    pub pod_namespace: String,
    pub container_id: String,
    /// Network namespace path of the pod sandbox
    pub netns_path: String,
    /// Interface name inside the pod (e.g. "eth0")
    pub interface_name: String,
    pub container_ips: Vec<PodAddress>,
    pub mtu: u32,
    /// Dataplane index of the tun/tap backing the pod interface
    pub sw_if_index: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PodAddress {
    pub address: IpAddr,
    pub prefix_len: u8,
}

impl PodState {
    /// Unique key of the record
    pub fn key(&self) -> String {
        format!("{}--{}", self.netns_path, self.interface_name)
    }

    /// Multi-line dump of every field, used by the debug tool.
    pub fn full_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Pod:           {}/{}", self.pod_namespace, self.pod_name);
        let _ = writeln!(out, "ContainerID:   {}", self.container_id);
        let _ = writeln!(out, "NetnsPath:     {}", self.netns_path);
        let _ = writeln!(out, "InterfaceName: {}", self.interface_name);
        let ips = self
            .container_ips
            .iter()
            .map(|ip| format!("{}/{}", ip.address, ip.prefix_len))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "ContainerIps:  [{}]", ips);
        let _ = writeln!(out, "Mtu:           {}", self.mtu);
        match self.sw_if_index {
            Some(idx) => {
                let _ = write!(out, "SwIfIndex:     {}", idx);
            }
            None => {
                let _ = write!(out, "SwIfIndex:     <none>");
            }
        }
        out
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PodStateFile {
    version: u32,
    pods: Vec<PodState>,
}

/// Loads every record from the store at `path`.
pub fn load_pod_states(path: &Path) -> Result<Vec<PodState>> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read pod state file {}", path.display()))?;
    let file: PodStateFile = serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse pod state file {}", path.display()))?;

    if file.version != CNI_SERVER_STATE_FILE_VERSION {
        anyhow::bail!(
            "Pod state file {} has version {}, expected {}",
            path.display(),
            file.version,
            CNI_SERVER_STATE_FILE_VERSION
        );
    }

    Ok(file.pods)
}

/// Writes the store atomically (write to a sibling temp file, then rename).
pub fn save_pod_states(path: &Path, pods: &[PodState]) -> Result<()> {
    let file = PodStateFile {
        version: CNI_SERVER_STATE_FILE_VERSION,
        pods: pods.to_vec(),
    };
    let data = serde_json::to_vec_pretty(&file)?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)
        .with_context(|| format!("Failed to write pod state file {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move pod state file into {}", path.display()))?;
    Ok(())
}
