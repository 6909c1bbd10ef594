use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::{Duration, interval};
use tracing::{error, info, instrument, warn};

use vpp_uplink_agent::config::AgentConfig;
use vpp_uplink_agent::dataplane::vppctl::VppctlClient;
use vpp_uplink_agent::lifecycle::UplinkController;
use vpp_uplink_agent::netlink::RtnetlinkKernel;
use vpp_uplink_agent::state_store::StateStore;

/// How often the agent checks that VPP is still alive
const VPP_CHECK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownReason {
    Interrupted,
    Terminated,
    VppExited,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupted => f.write_str("interrupted"),
            ShutdownReason::Terminated => f.write_str("terminated"),
            ShutdownReason::VppExited => f.write_str("VPP exited"),
        }
    }
}

/// Waits for SIGINT, SIGTERM or the death of the dataplane process.
async fn wait_for_shutdown(vpp_pid: u32) -> Result<ShutdownReason> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let proc_dir = PathBuf::from(format!("/proc/{}", vpp_pid));
    let mut vpp_check = interval(VPP_CHECK_INTERVAL);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for SIGINT: {}", e);
                    continue;
                }
                return Ok(ShutdownReason::Interrupted);
            }

            _ = sigterm.recv() => return Ok(ShutdownReason::Terminated),

            _ = vpp_check.tick() => {
                if !proc_dir.exists() {
                    return Ok(ShutdownReason::VppExited);
                }
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
#[instrument]
async fn main() -> Result<()> {
    // Load configuration from CLI and environment
    let config = AgentConfig::from_cli_and_env()?;

    config.init_logging()?;
    config.env.log_summary();
    config.validate()?;

    info!(
        "Starting vpp-uplink-agent on node '{}' with {} uplinks",
        config.env.node_name,
        config.env.interfaces.len()
    );

    let kernel = RtnetlinkKernel::new().context("Failed to open netlink connection")?;
    let vpp = VppctlClient::new(config.app.vppctl_socket.clone());
    let store = StateStore::new(config.app.state_file.clone());
    let mut controller = UplinkController::new(kernel, vpp, config.env.interfaces.clone(), store);

    // Leftovers of a crashed run go back to Linux before anything else
    let recovered = controller.recover_from_crash().await;
    if recovered.iter().any(|r| !r.is_clean()) {
        warn!("Some uplinks of the previous run were not fully restored");
    }

    if config.app.restore_only {
        info!("Restore-only run complete, {} uplinks restored", recovered.len());
        return Ok(());
    }

    let vpp_pid = config.app.resolve_vpp_pid()?;
    controller
        .start(vpp_pid)
        .await
        .with_context(|| format!("Failed to hand uplinks to VPP (pid {})", vpp_pid))?;
    info!("All uplinks handed to VPP (pid {})", vpp_pid);

    let waited = wait_for_shutdown(vpp_pid).await;
    let reports = match &waited {
        Ok(reason) => {
            info!("Agent {}, restoring uplinks", reason);
            controller.restore_all().await
        }
        Err(e) => {
            error!("{:#}, restoring uplinks", e);
            controller.rollback().await
        }
    };
    let failed = reports.iter().filter(|r| !r.is_clean()).count();
    if failed > 0 {
        warn!(
            "{} of {} uplinks were restored with errors",
            failed,
            reports.len()
        );
    } else {
        info!("All uplinks restored");
    }

    waited.map(|_| ())
}
