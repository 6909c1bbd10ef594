//! [`DataplaneClient`] over `vppctl`.
//!
//! Requests are VPP debug CLI commands sent through the CLI socket. Replies
//! are free-form text, so each request has a small parser that extracts the
//! interface name or index from it. A reply that does not parse is reported
//! as [`DataplaneError::UnexpectedReply`] with the raw text attached.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use vpp_uplink_shared::errors::{DataplaneError, DataplaneResult};

use super::{AfPacketInterface, AfXdpInterface, DataplaneClient, GenericVppInterface, RdmaInterface};

/// One row of `show interface`: name, index, admin state.
static SHOW_INTERFACE_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(\S+)\s+(\d+)\s+(up|down)\b").expect("interface row pattern is valid")
});

/// Header row of `show hardware-interfaces`: name, index, link state.
static SHOW_HARDWARE_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)\s+(\d+)\s+(up|down)\b").expect("hardware row pattern is valid")
});

/// A create command prints only the new interface name on success.
static CREATED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+$").expect("name pattern is valid"));

/// Dataplane client that shells out to `vppctl`.
#[derive(Debug, Clone)]
pub struct VppctlClient {
    binary: PathBuf,
    socket: PathBuf,
}

impl VppctlClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            binary: PathBuf::from("vppctl"),
            socket: socket.into(),
        }
    }

    /// Uses a different `vppctl` executable.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    #[instrument(skip(self))]
    async fn run(&self, request: &str) -> DataplaneResult<String> {
        debug!("vppctl: {}", request);
        let output = Command::new(&self.binary)
            .arg("-s")
            .arg(&self.socket)
            .args(request.split_whitespace())
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DataplaneError::RequestFailed {
                request: request.to_string(),
                message: format!("{} {}", stderr.trim(), stdout).trim().to_string(),
            });
        }

        // The CLI reports command errors on stdout with a zero exit status
        if is_cli_error(&stdout) {
            return Err(DataplaneError::RequestFailed {
                request: request.to_string(),
                message: stdout,
            });
        }
        Ok(stdout)
    }

    async fn create(&self, request: String, intf: &GenericVppInterface) -> DataplaneResult<u32> {
        let reply = self.run(&request).await?;
        let name = parse_created_name(&request, &reply)?;

        if let Some(mac) = &intf.hardware_addr {
            self.run(&format!("set interface mac address {} {}", name, mac))
                .await?;
        }
        self.run(&format!("set interface rx-mode {} {}", name, intf.rx_mode))
            .await?;

        let listing = self.run(&format!("show interface {}", name)).await?;
        let sw_if_index = parse_interface_index(&listing, &name).ok_or_else(|| {
            DataplaneError::UnexpectedReply {
                request: format!("show interface {}", name),
                reply: listing.clone(),
            }
        })?;

        info!("Created {} with sw_if_index {}", name, sw_if_index);
        Ok(sw_if_index)
    }

    async fn interface_name(&self, sw_if_index: u32) -> DataplaneResult<String> {
        let listing = self.run("show interface").await?;
        parse_interface_rows(&listing)
            .into_iter()
            .find(|(_, idx)| *idx == sw_if_index)
            .map(|(name, _)| name)
            .ok_or_else(|| DataplaneError::InterfaceNotFound(format!("sw_if_index {}", sw_if_index)))
    }
}

fn is_cli_error(reply: &str) -> bool {
    let first = reply.lines().next().unwrap_or_default();
    first.contains("unknown input") || first.contains("error") || first.starts_with("Error")
}

fn queue_args(intf: &GenericVppInterface, rx_size_flag: &str, tx_size_flag: &str) -> String {
    let mut args = format!("num-rx-queues {}", intf.num_rx_queues);
    if intf.rx_queue_size > 0 {
        args.push_str(&format!(" {} {}", rx_size_flag, intf.rx_queue_size));
    }
    if intf.tx_queue_size > 0 {
        args.push_str(&format!(" {} {}", tx_size_flag, intf.tx_queue_size));
    }
    args
}

pub(crate) fn af_packet_request(intf: &AfPacketInterface) -> String {
    let g = &intf.generic;
    format!(
        "create host-interface name {} {} num-tx-queues {}",
        g.host_interface_name,
        queue_args(g, "rx-size", "tx-size"),
        g.num_tx_queues
    )
}

pub(crate) fn af_xdp_request(intf: &AfXdpInterface) -> String {
    let g = &intf.generic;
    format!(
        "create interface af_xdp host-if {} name {} {}",
        g.host_interface_name,
        g.host_interface_name,
        queue_args(g, "rxq-size", "txq-size")
    )
}

pub(crate) fn rdma_request(intf: &RdmaInterface) -> String {
    let g = &intf.generic;
    format!(
        "create interface rdma host-if {} name {} {}",
        g.host_interface_name,
        g.host_interface_name,
        queue_args(g, "rx-queue-size", "tx-queue-size")
    )
}

pub(crate) fn parse_created_name(request: &str, reply: &str) -> DataplaneResult<String> {
    let name = reply.lines().last().unwrap_or_default().trim();
    if CREATED_NAME.is_match(name) {
        Ok(name.to_string())
    } else {
        Err(DataplaneError::UnexpectedReply {
            request: request.to_string(),
            reply: reply.to_string(),
        })
    }
}

pub(crate) fn parse_interface_rows(listing: &str) -> Vec<(String, u32)> {
    SHOW_INTERFACE_ROW
        .captures_iter(listing)
        .filter_map(|caps| {
            let idx = caps[2].parse().ok()?;
            Some((caps[1].to_string(), idx))
        })
        .collect()
}

pub(crate) fn parse_interface_index(listing: &str, name: &str) -> Option<u32> {
    parse_interface_rows(listing)
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, idx)| idx)
}

/// Finds the index of the hardware interface whose detail block mentions
/// `pci_id`.
pub(crate) fn parse_hardware_index_for_pci(listing: &str, pci_id: &str) -> Option<u32> {
    let mut current = None;
    for line in listing.lines() {
        if let Some(caps) = SHOW_HARDWARE_ROW.captures(line) {
            current = caps[2].parse::<u32>().ok();
            continue;
        }
        if current.is_some() && line.contains(pci_id) {
            return current;
        }
    }
    None
}

impl DataplaneClient for VppctlClient {
    async fn create_af_packet(&self, intf: &AfPacketInterface) -> DataplaneResult<u32> {
        self.create(af_packet_request(intf), &intf.generic).await
    }

    async fn create_af_xdp(&self, intf: &AfXdpInterface) -> DataplaneResult<u32> {
        self.create(af_xdp_request(intf), &intf.generic).await
    }

    async fn create_rdma(&self, intf: &RdmaInterface) -> DataplaneResult<u32> {
        self.create(rdma_request(intf), &intf.generic).await
    }

    async fn dpdk_interface_index(&self, pci_id: &str) -> DataplaneResult<u32> {
        let listing = self.run("show hardware-interfaces").await?;
        parse_hardware_index_for_pci(&listing, pci_id)
            .ok_or_else(|| DataplaneError::InterfaceNotFound(format!("PCI device {}", pci_id)))
    }

    async fn tag_interface(&self, sw_if_index: u32, tag: &str) -> DataplaneResult<()> {
        let name = self.interface_name(sw_if_index).await?;
        self.run(&format!("set interface tag {} {}", name, tag)).await?;
        Ok(())
    }
}
