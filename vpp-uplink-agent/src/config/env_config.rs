//! Environment configuration for the uplink agent.
//!
//! The agent is deployed as a DaemonSet container and configured through
//! `CALICOVPP_*` environment variables. Every recognised variable is parsed
//! strictly: a malformed value is a [`ConfigError`] and the agent stops
//! before touching any interface. Variables carrying the `CALICOVPP_` prefix
//! that the agent does not know are collected so they can be reported once
//! logging is up.

use std::collections::{HashMap, HashSet};
use std::fmt;

use ipnetwork::IpNetwork;
use tracing::{info, warn};

use vpp_uplink_shared::errors::{ConfigError, ConfigResult};
use vpp_uplink_shared::{DriverKind, InterfaceSpec, RxMode};

use super::app_config::LogLevel;

pub const INTERFACE_ENV_VAR: &str = "CALICOVPP_INTERFACE";
pub const NATIVE_DRIVER_ENV_VAR: &str = "CALICOVPP_NATIVE_DRIVER";
pub const RX_QUEUES_ENV_VAR: &str = "CALICOVPP_RX_QUEUES";
pub const TX_QUEUES_ENV_VAR: &str = "CALICOVPP_TX_QUEUES";
pub const RING_SIZE_ENV_VAR: &str = "CALICOVPP_RING_SIZE";
pub const RX_MODE_ENV_VAR: &str = "CALICOVPP_RX_MODE";
pub const INTERFACE_MTU_ENV_VAR: &str = "CALICOVPP_INTERFACE_MTU";
pub const NODE_NAME_ENV_VAR: &str = "NODENAME";
pub const TAP_RX_QUEUES_ENV_VAR: &str = "CALICOVPP_TAP_RX_QUEUES";
pub const TAP_TX_QUEUES_ENV_VAR: &str = "CALICOVPP_TAP_TX_QUEUES";
pub const TAP_GSO_ENV_VAR: &str = "CALICOVPP_DEBUG_ENABLE_GSO";
pub const ENABLE_SERVICES_ENV_VAR: &str = "CALICOVPP_DEBUG_ENABLE_NAT";
pub const ENABLE_POLICIES_ENV_VAR: &str = "CALICOVPP_DEBUG_ENABLE_POLICIES";
pub const CROSS_IPSEC_TUNNELS_ENV_VAR: &str = "CALICOVPP_IPSEC_CROSS_TUNNELS";
pub const ENABLE_IPSEC_ENV_VAR: &str = "CALICOVPP_IPSEC_ENABLED";
pub const IPSEC_EXTRA_ADDRESSES_ENV_VAR: &str = "CALICOVPP_IPSEC_ASSUME_EXTRA_ADDRESSES";
pub const IPSEC_IKEV2_PSK_ENV_VAR: &str = "CALICOVPP_IPSEC_IKEV2_PSK";
pub const TAP_RX_MODE_ENV_VAR: &str = "CALICOVPP_TAP_RX_MODE";
pub const TAP_RING_SIZE_ENV_VAR: &str = "CALICOVPP_TAP_RING_SIZE";
pub const TAP_MTU_ENV_VAR: &str = "CALICOVPP_TAP_MTU";
pub const BGP_LOG_LEVEL_ENV_VAR: &str = "CALICO_BGP_LOGSEVERITYSCREEN";
pub const LOG_LEVEL_ENV_VAR: &str = "CALICO_LOG_LEVEL";
pub const SERVICE_PREFIX_ENV_VAR: &str = "SERVICE_PREFIX";

/// Parses one service prefix. The CIDR length is mandatory and host bits
/// are cleared, so `10.96.0.10/12` yields `10.96.0.0/12`.
fn parse_cidr(s: &str) -> Result<IpNetwork, String> {
    let s = s.trim();
    if !s.contains('/') {
        return Err(format!("'{}' is not in CIDR notation", s));
    }
    let net: IpNetwork = s.parse().map_err(|e| format!("'{}': {}", s, e))?;
    IpNetwork::new(net.network(), net.prefix()).map_err(|e| format!("'{}': {}", s, e))
}

/// Settings of the tap interfaces the dataplane creates for pods.
#[derive(Debug, Clone, PartialEq)]
pub struct TapConfig {
    pub num_rx_queues: u16,
    pub num_tx_queues: u16,
    pub rx_queue_size: u32,
    pub tx_queue_size: u32,
    pub mtu: u32,
    pub rx_mode: RxMode,
    pub gso_enabled: bool,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            num_rx_queues: 1,
            num_tx_queues: 1,
            rx_queue_size: 0,
            tx_queue_size: 0,
            mtu: 0,
            rx_mode: RxMode::default(),
            gso_enabled: true,
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct IpsecConfig {
    pub enabled: bool,
    pub cross_tunnels: bool,
    /// Addresses per node used for tunnels, the node address included
    pub address_count: u8,
    pub ikev2_psk: String,
}

impl Default for IpsecConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cross_tunnels: false,
            address_count: 1,
            ikev2_psk: String::new(),
        }
    }
}

impl fmt::Debug for IpsecConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpsecConfig")
            .field("enabled", &self.enabled)
            .field("cross_tunnels", &self.cross_tunnels)
            .field("address_count", &self.address_count)
            .field("ikev2_psk", &"<redacted>")
            .finish()
    }
}

/// Configuration read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvConfig {
    /// Uplinks in configuration order, the first one is the main uplink
    pub interfaces: Vec<InterfaceSpec>,
    pub node_name: String,
    pub log_level: Option<LogLevel>,
    pub bgp_log_level: Option<LogLevel>,
    pub tap: TapConfig,
    pub enable_services: bool,
    pub enable_policies: bool,
    pub ipsec: IpsecConfig,
    pub service_cidrs: Vec<IpNetwork>,
    /// `CALICOVPP_` variables present but not recognised
    pub unsupported_vars: Vec<String>,
    /// Non-fatal problems found while parsing
    pub warnings: Vec<String>,
}

/// Tracks which variables were consulted, so unknown ones can be reported.
struct EnvReader {
    vars: HashMap<String, String>,
    seen: HashSet<&'static str>,
}

impl EnvReader {
    fn new<I: IntoIterator<Item = (String, String)>>(vars: I) -> Self {
        Self {
            vars: vars.into_iter().collect(),
            seen: HashSet::new(),
        }
    }

    /// Value of `name`, `None` when unset or empty.
    fn get(&mut self, name: &'static str) -> Option<String> {
        self.seen.insert(name);
        self.vars
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn unsupported(&self) -> Vec<String> {
        let mut unknown = self
            .vars
            .keys()
            .filter(|k| k.contains("CALICOVPP_") && !self.seen.contains(k.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        unknown.sort();
        unknown
    }
}

fn parse_bool(variable: &str, value: &str) -> ConfigResult<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(ConfigError::invalid(variable, value, "not a boolean")),
    }
}

/// Queue counts must be positive and fit in 16 bits.
fn parse_queue_count(variable: &str, value: &str) -> ConfigResult<u16> {
    let queues: i16 = value
        .parse()
        .map_err(|e| ConfigError::invalid(variable, value, e))?;
    if queues <= 0 {
        return Err(ConfigError::invalid(variable, value, "must be > 0"));
    }
    Ok(queues as u16)
}

fn parse_non_negative(variable: &str, value: &str) -> ConfigResult<u32> {
    let n: i32 = value
        .parse()
        .map_err(|e| ConfigError::invalid(variable, value, e))?;
    u32::try_from(n).map_err(|_| ConfigError::invalid(variable, value, "must be >= 0"))
}

/// `n` for both directions, or `rx,tx`.
fn parse_ring_size(variable: &str, value: &str) -> ConfigResult<(u32, u32)> {
    let sizes = value.split(',').map(str::trim).collect::<Vec<_>>();
    match sizes.as_slice() {
        [both] => {
            let sz = parse_non_negative(variable, both)?;
            Ok((sz, sz))
        }
        [rx, tx] => Ok((
            parse_non_negative(variable, rx)?,
            parse_non_negative(variable, tx)?,
        )),
        _ => Err(ConfigError::invalid(
            variable,
            value,
            "expected 'size' or 'rx_size,tx_size'",
        )),
    }
}

/// Unknown modes fall back to the default.
fn parse_rx_mode(value: Option<&str>) -> RxMode {
    match value {
        Some("interrupt") => RxMode::Interrupt,
        Some("polling") => RxMode::Polling,
        Some("adaptive") => RxMode::Adaptive,
        _ => RxMode::default(),
    }
}

impl EnvConfig {
    /// Reads the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Parses configuration from an explicit set of variables.
    pub fn from_vars<I: IntoIterator<Item = (String, String)>>(vars: I) -> ConfigResult<Self> {
        let mut env = EnvReader::new(vars);
        let mut warnings = Vec::new();

        let mut parse_level = |env: &mut EnvReader, variable: &'static str| {
            let value = env.get(variable)?;
            match value.parse::<LogLevel>() {
                Ok(level) => Some(level),
                Err(_) => {
                    warnings.push(format!(
                        "Failed to parse {}: {}, defaulting to info",
                        variable, value
                    ));
                    None
                }
            }
        };
        let bgp_log_level = parse_level(&mut env, BGP_LOG_LEVEL_ENV_VAR);
        let log_level = parse_level(&mut env, LOG_LEVEL_ENV_VAR);

        let node_name = env.get(NODE_NAME_ENV_VAR).unwrap_or_default();

        let mut tap = TapConfig::default();
        if let Some(v) = env.get(TAP_RX_QUEUES_ENV_VAR) {
            tap.num_rx_queues = parse_queue_count(TAP_RX_QUEUES_ENV_VAR, &v)?;
        }
        if let Some(v) = env.get(TAP_TX_QUEUES_ENV_VAR) {
            tap.num_tx_queues = parse_queue_count(TAP_TX_QUEUES_ENV_VAR, &v)?;
        }
        if let Some(v) = env.get(TAP_GSO_ENV_VAR) {
            tap.gso_enabled = parse_bool(TAP_GSO_ENV_VAR, &v)?;
        }
        if let Some(v) = env.get(TAP_MTU_ENV_VAR) {
            tap.mtu = parse_non_negative(TAP_MTU_ENV_VAR, &v)?;
        }
        if let Some(v) = env.get(TAP_RING_SIZE_ENV_VAR) {
            (tap.rx_queue_size, tap.tx_queue_size) = parse_ring_size(TAP_RING_SIZE_ENV_VAR, &v)?;
        }
        tap.rx_mode = parse_rx_mode(env.get(TAP_RX_MODE_ENV_VAR).as_deref());

        let mut ipsec = IpsecConfig::default();
        if let Some(v) = env.get(ENABLE_IPSEC_ENV_VAR) {
            ipsec.enabled = parse_bool(ENABLE_IPSEC_ENV_VAR, &v)?;
        }
        if let Some(v) = env.get(CROSS_IPSEC_TUNNELS_ENV_VAR) {
            ipsec.cross_tunnels = parse_bool(CROSS_IPSEC_TUNNELS_ENV_VAR, &v)?;
        }
        if let Some(v) = env.get(IPSEC_EXTRA_ADDRESSES_ENV_VAR) {
            let extra: i8 = v
                .parse()
                .map_err(|e| ConfigError::invalid(IPSEC_EXTRA_ADDRESSES_ENV_VAR, &v, e))?;
            if extra < 0 {
                return Err(ConfigError::invalid(
                    IPSEC_EXTRA_ADDRESSES_ENV_VAR,
                    &v,
                    "must be >= 0",
                ));
            }
            ipsec.address_count = extra as u8 + 1;
        }

        let mut enable_services = true;
        if let Some(v) = env.get(ENABLE_SERVICES_ENV_VAR) {
            enable_services = parse_bool(ENABLE_SERVICES_ENV_VAR, &v)?;
        }
        let mut enable_policies = true;
        if let Some(v) = env.get(ENABLE_POLICIES_ENV_VAR) {
            enable_policies = parse_bool(ENABLE_POLICIES_ENV_VAR, &v)?;
        }

        let psk = env.get(IPSEC_IKEV2_PSK_ENV_VAR).unwrap_or_default();
        if ipsec.enabled && psk.is_empty() {
            return Err(ConfigError::MissingValue {
                variable: IPSEC_IKEV2_PSK_ENV_VAR.to_string(),
                reason: "IKEv2 PSK not configured while IPSec is enabled".to_string(),
            });
        }
        ipsec.ikev2_psk = psk;

        let service_cidrs = match env.get(SERVICE_PREFIX_ENV_VAR) {
            Some(v) => v
                .split(',')
                .map(|prefix| {
                    parse_cidr(prefix)
                        .map_err(|e| ConfigError::invalid(SERVICE_PREFIX_ENV_VAR, prefix, e))
                })
                .collect::<ConfigResult<Vec<_>>>()?,
            None => Vec::new(),
        };

        let interfaces = Self::parse_interfaces(&mut env)?;
        let unsupported_vars = env.unsupported();

        Ok(Self {
            interfaces,
            node_name,
            log_level,
            bgp_log_level,
            tap,
            enable_services,
            enable_policies,
            ipsec,
            service_cidrs,
            unsupported_vars,
            warnings,
        })
    }

    fn parse_interfaces(env: &mut EnvReader) -> ConfigResult<Vec<InterfaceSpec>> {
        let native_driver = env
            .get(NATIVE_DRIVER_ENV_VAR)
            .map(|v| {
                v.parse::<DriverKind>()
                    .map_err(|e| ConfigError::invalid(NATIVE_DRIVER_ENV_VAR, &v, e))
            })
            .transpose()?;

        let num_rx_queues = match env.get(RX_QUEUES_ENV_VAR) {
            Some(v) => parse_queue_count(RX_QUEUES_ENV_VAR, &v)?,
            None => 1,
        };
        let num_tx_queues = match env.get(TX_QUEUES_ENV_VAR) {
            Some(v) => parse_queue_count(TX_QUEUES_ENV_VAR, &v)?,
            None => 1,
        };
        let (rx_queue_size, tx_queue_size) = match env.get(RING_SIZE_ENV_VAR) {
            Some(v) => parse_ring_size(RING_SIZE_ENV_VAR, &v)?,
            None => (0, 0),
        };
        let rx_mode = parse_rx_mode(env.get(RX_MODE_ENV_VAR).as_deref());
        let mtu = match env.get(INTERFACE_MTU_ENV_VAR) {
            Some(v) => match parse_non_negative(INTERFACE_MTU_ENV_VAR, &v)? {
                0 => None,
                mtu => Some(mtu),
            },
            None => None,
        };

        let Some(names) = env.get(INTERFACE_ENV_VAR) else {
            return Ok(Vec::new());
        };

        let mut specs: Vec<InterfaceSpec> = Vec::new();
        for name in names.split(',').map(str::trim) {
            if name.is_empty() {
                return Err(ConfigError::invalid(
                    INTERFACE_ENV_VAR,
                    &names,
                    "empty interface name",
                ));
            }
            if specs.iter().any(|s| s.interface_name == name) {
                return Err(ConfigError::invalid(
                    INTERFACE_ENV_VAR,
                    &names,
                    format!("{} listed twice", name),
                ));
            }

            specs.push(InterfaceSpec {
                native_driver,
                mtu,
                num_rx_queues,
                num_tx_queues,
                rx_queue_size,
                tx_queue_size,
                rx_mode,
                ..InterfaceSpec::new(name, specs.is_empty())
            });
        }
        Ok(specs)
    }

    /// Logs the effective configuration and every parsing warning.
    pub fn log_summary(&self) {
        for warning in &self.warnings {
            warn!("{}", warning);
        }
        for var in &self.unsupported_vars {
            warn!("Environment variable {} is not supported", var);
        }

        for spec in &self.interfaces {
            info!(
                "Config:Interface         {} main={} driver={} rxq={} txq={} ring={}/{} mode={}",
                spec.interface_name,
                spec.is_main,
                spec.native_driver
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "auto".to_string()),
                spec.num_rx_queues,
                spec.num_tx_queues,
                spec.rx_queue_size,
                spec.tx_queue_size,
                spec.rx_mode
            );
        }
        info!("Config:TapNumRxQueues    {}", self.tap.num_rx_queues);
        info!("Config:TapGSOEnabled     {}", self.tap.gso_enabled);
        info!("Config:EnableServices    {}", self.enable_services);
        info!("Config:EnableIPSec       {}", self.ipsec.enabled);
        info!("Config:CrossIpsecTunnels {}", self.ipsec.cross_tunnels);
        info!("Config:EnablePolicies    {}", self.enable_policies);
        info!("Config:IpsecAddressCount {}", self.ipsec.address_count);
        info!("Config:RxMode            {}", self.tap.rx_mode);
        info!("Config:TapMtu            {}", self.tap.mtu);
        for cidr in &self.service_cidrs {
            info!("Config:ServiceCIDR       {}", cidr);
        }
    }
}
