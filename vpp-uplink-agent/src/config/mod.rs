//! Configuration management module for the uplink agent.
//!
//! This module provides centralized configuration management with support for:
//! - CLI argument parsing
//! - `CALICOVPP_*` environment variable configuration
//! - Configuration validation

pub mod app_config;
pub mod cli;
pub mod env_config;

pub use app_config::{AppConfig, LogLevel};
pub use cli::CliConfig;
pub use env_config::{EnvConfig, IpsecConfig, TapConfig};
pub use ipnetwork::IpNetwork;

use anyhow::Result;

/// Main configuration manager that combines all configuration sources
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub app: AppConfig,
    pub env: EnvConfig,
}

impl AgentConfig {
    /// Creates the configuration from CLI arguments and environment
    pub fn from_cli_and_env() -> Result<Self> {
        let cli_config = CliConfig::from_args()?;
        cli_config.validate()?;
        let env_config = EnvConfig::from_env()?;
        let app_config = AppConfig::from_cli(&cli_config, env_config.log_level)?;

        Ok(Self {
            app: app_config,
            env: env_config,
        })
    }

    /// Validates the entire configuration
    pub fn validate(&self) -> Result<()> {
        self.app.validate()?;

        if !self.app.restore_only && self.env.interfaces.is_empty() {
            return Err(anyhow::anyhow!(
                "No uplink configured: set {}",
                env_config::INTERFACE_ENV_VAR
            ));
        }
        Ok(())
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> Result<()> {
        self.app.init_logging()
    }
}
