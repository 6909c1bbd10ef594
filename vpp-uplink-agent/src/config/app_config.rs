//! Application configuration for the uplink agent.
//!
//! This module handles runtime settings that come from the command line:
//! logging, where to find the dataplane, and where captured state lives.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use super::cli::CliConfig;

/// Crates whose debug output drowns the agent's own logs
const NOISY_CRATES: &str = "netlink_proto=warn";

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing level filter string
    pub fn to_filter_string(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    /// Accepts tracing names and the logrus names used by Calico
    /// (`panic`, `fatal`, `warning`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "panic" | "fatal" | "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("not a valid log level: {:?}", other)),
        }
    }
}

/// Application configuration structure
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_level: LogLevel,
    /// Full filter handed to the subscriber, noisy crates included
    pub log_filter: String,
    pub vpp_pid: Option<u32>,
    pub vpp_pid_file: PathBuf,
    pub vppctl_socket: PathBuf,
    pub state_file: PathBuf,
    pub restore_only: bool,
}

impl AppConfig {
    /// Create application configuration from CLI config.
    ///
    /// Level priority: `--verbose`, then `RUST_LOG`, then the level the
    /// environment configuration asked for, then info.
    pub fn from_cli(cli_config: &CliConfig, env_log_level: Option<LogLevel>) -> Result<Self> {
        let rust_log = env::var("RUST_LOG").ok().filter(|v| !v.is_empty());
        Ok(Self::resolve(cli_config, rust_log.as_deref(), env_log_level))
    }

    fn resolve(
        cli_config: &CliConfig,
        rust_log: Option<&str>,
        env_log_level: Option<LogLevel>,
    ) -> Self {
        let (log_level, log_filter) = if cli_config.verbose {
            (
                LogLevel::Debug,
                format!("{},{}", LogLevel::Debug.to_filter_string(), NOISY_CRATES),
            )
        } else if let Some(existing) = rust_log {
            // Respect RUST_LOG but still filter noisy crates
            (
                Self::parse_log_level(existing),
                format!("{},{}", existing, NOISY_CRATES),
            )
        } else {
            let level = env_log_level.unwrap_or(LogLevel::Info);
            (level, format!("{},{}", level.to_filter_string(), NOISY_CRATES))
        };

        Self {
            log_level,
            log_filter,
            vpp_pid: cli_config.vpp_pid,
            vpp_pid_file: PathBuf::from(&cli_config.vpp_pid_file),
            vppctl_socket: PathBuf::from(&cli_config.vppctl_socket),
            state_file: PathBuf::from(&cli_config.state_file),
            restore_only: cli_config.restore_only,
        }
    }

    /// Parse log level from string
    fn parse_log_level(level_str: &str) -> LogLevel {
        // Extract the main level from complex RUST_LOG format
        let main_level = level_str
            .split(',')
            .next()
            .unwrap_or(level_str)
            .split('=')
            .next()
            .unwrap_or(level_str);

        main_level.parse().unwrap_or(LogLevel::Info)
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> Result<()> {
        let filter = EnvFilter::try_new(&self.log_filter)
            .with_context(|| format!("Invalid log filter '{}'", self.log_filter))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true)
            .event_format(
                tracing_subscriber::fmt::format()
                    .with_target(false)
                    .compact(),
            )
            .init();

        tracing::info!("Logging initialized with level: {:?}", self.log_level);
        Ok(())
    }

    /// PID of the dataplane: the command line value, else the PID file.
    pub fn resolve_vpp_pid(&self) -> Result<u32> {
        if let Some(pid) = self.vpp_pid {
            return Ok(pid);
        }

        let content = std::fs::read_to_string(&self.vpp_pid_file).with_context(|| {
            format!("Failed to read VPP pid file {}", self.vpp_pid_file.display())
        })?;
        let pid: u32 = content.trim().parse().with_context(|| {
            format!(
                "VPP pid file {} does not hold a pid: {:?}",
                self.vpp_pid_file.display(),
                content.trim()
            )
        })?;
        if pid == 0 {
            return Err(anyhow::anyhow!(
                "VPP pid file {} holds pid 0",
                self.vpp_pid_file.display()
            ));
        }
        Ok(pid)
    }

    /// Validate application configuration
    pub fn validate(&self) -> Result<()> {
        if self.vpp_pid == Some(0) {
            return Err(anyhow::anyhow!("VPP pid must be greater than 0"));
        }

        if self.state_file.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("State file path cannot be empty"));
        }

        if self.vppctl_socket.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("vppctl socket path cannot be empty"));
        }

        Ok(())
    }
}
