//! CLI argument parsing for the uplink agent.
//!
//! This module handles command line argument parsing using clap and provides
//! a structured representation of CLI configuration that can be used by
//! other configuration components.

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

use vpp_uplink_shared::paths;

/// CLI configuration structure containing all parsed command line arguments
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub verbose: bool,
    pub vpp_pid: Option<u32>,
    pub vpp_pid_file: String,
    pub vppctl_socket: String,
    pub state_file: String,
    pub restore_only: bool,
}

impl CliConfig {
    /// Parse CLI arguments and create CliConfig
    pub fn from_args() -> Result<Self> {
        let matches = Self::build_cli().get_matches();
        Self::from_matches(&matches)
    }

    /// Create CliConfig from pre-parsed ArgMatches (useful for testing)
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let verbose = matches.get_flag("verbose");
        let restore_only = matches.get_flag("restore-only");
        let vpp_pid = matches.get_one::<u32>("vpp-pid").copied();

        let vpp_pid_file = matches
            .get_one::<String>("vpp-pid-file")
            .ok_or_else(|| anyhow::anyhow!("VPP pid file is required"))?
            .clone();

        let vppctl_socket = matches
            .get_one::<String>("vppctl-socket")
            .ok_or_else(|| anyhow::anyhow!("vppctl socket is required"))?
            .clone();

        let state_file = matches
            .get_one::<String>("state-file")
            .ok_or_else(|| anyhow::anyhow!("State file is required"))?
            .clone();

        Ok(Self {
            verbose,
            vpp_pid,
            vpp_pid_file,
            vppctl_socket,
            state_file,
            restore_only,
        })
    }

    /// Build the clap Command structure
    pub fn build_cli() -> Command {
        Command::new("vpp-uplink-agent")
            .version(env!("CARGO_PKG_VERSION"))
            .about("VPP uplink agent - hands node uplinks to VPP and restores them")
            .long_about("A privileged node agent that captures the Linux state of the configured \
                       uplinks, hands them to a running VPP dataplane, and restores the original \
                       kernel configuration when VPP exits or the agent is stopped.")
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .action(clap::ArgAction::SetTrue)
                    .help("Enable verbose logging")
                    .long_help("Enable verbose debug logging. This will show detailed information \
                              about netlink operations, namespace moves and vppctl requests."),
            )
            .arg(
                Arg::new("vpp-pid")
                    .long("vpp-pid")
                    .value_name("PID")
                    .value_parser(clap::value_parser!(u32))
                    .help("PID of the running VPP process")
                    .long_help("PID of the running VPP process. Its network namespace receives the \
                              uplinks. When omitted, the PID is read from --vpp-pid-file."),
            )
            .arg(
                Arg::new("vpp-pid-file")
                    .long("vpp-pid-file")
                    .value_name("PATH")
                    .help("File holding the VPP PID")
                    .default_value(paths::VPP_PID_FILE),
            )
            .arg(
                Arg::new("vppctl-socket")
                    .long("vppctl-socket")
                    .value_name("PATH")
                    .help("VPP CLI socket")
                    .default_value(paths::VPP_CLI_SOCKET),
            )
            .arg(
                Arg::new("state-file")
                    .long("state-file")
                    .value_name("PATH")
                    .help("Where to persist captured uplink state")
                    .long_help("Where to persist the captured Linux state of the uplinks while VPP \
                              owns them. A file left behind by a crashed agent is used to restore \
                              the uplinks on the next start.")
                    .default_value(paths::UPLINK_STATE_FILE),
            )
            .arg(
                Arg::new("restore-only")
                    .long("restore-only")
                    .action(clap::ArgAction::SetTrue)
                    .help("Only restore uplinks left by a previous run, then exit"),
            )
    }

    /// Validate CLI configuration
    pub fn validate(&self) -> Result<()> {
        if self.vpp_pid == Some(0) {
            return Err(anyhow::anyhow!("VPP pid must be greater than 0"));
        }

        if self.vppctl_socket.is_empty() {
            return Err(anyhow::anyhow!("vppctl socket path cannot be empty"));
        }

        if self.state_file.is_empty() {
            return Err(anyhow::anyhow!("State file path cannot be empty"));
        }

        Ok(())
    }
}
