use thiserror::Error;

use crate::DriverKind;

/// Errors raised while handing an uplink to the dataplane or taking it back.
///
/// Every variant carries the kernel interface name so the message alone is
/// enough for an operator to act on.
#[derive(Error, Debug)]
pub enum UplinkError {
    #[error("Error finding link {interface}: interface does not exist")]
    InterfaceNotFound { interface: String },

    #[error("Permission denied while trying to {operation} on {interface}: {message}")]
    Privilege {
        interface: String,
        operation: String,
        message: String,
    },

    #[error("Netlink error while trying to {operation} on {interface}: {message}")]
    Netlink {
        interface: String,
        operation: String,
        message: String,
    },

    #[error("Moving uplink {interface} between namespaces failed: {message}")]
    NamespaceMove { interface: String, message: String },

    #[error("Error creating {driver} interface for {interface}: {message}")]
    DataplaneCreate {
        interface: String,
        driver: DriverKind,
        message: String,
    },

    #[error("Error tagging dataplane interface {sw_if_index} with {interface}: {message}")]
    DataplaneTag {
        interface: String,
        sw_if_index: u32,
        message: String,
    },

    #[error(
        "Created {driver} interface for {interface} has wrong swIfIndex {actual}, expected {expected}"
    )]
    IndexMismatch {
        interface: String,
        driver: DriverKind,
        expected: u32,
        actual: u32,
    },

    #[error("Driver {driver} is not supported for {interface}")]
    UnsupportedDriver {
        interface: String,
        driver: DriverKind,
    },

    #[error("Sysfs operation on {interface} failed: {message}")]
    Sysfs { interface: String, message: String },
}

impl UplinkError {
    /// Name of the interface the error is about, when there is one.
    pub fn interface(&self) -> Option<&str> {
        match self {
            UplinkError::InterfaceNotFound { interface }
            | UplinkError::Privilege { interface, .. }
            | UplinkError::Netlink { interface, .. }
            | UplinkError::NamespaceMove { interface, .. }
            | UplinkError::DataplaneCreate { interface, .. }
            | UplinkError::DataplaneTag { interface, .. }
            | UplinkError::IndexMismatch { interface, .. }
            | UplinkError::UnsupportedDriver { interface, .. }
            | UplinkError::Sysfs { interface, .. } => Some(interface),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, UplinkError::InterfaceNotFound { .. })
    }

    pub fn not_found(interface: &str) -> Self {
        UplinkError::InterfaceNotFound {
            interface: interface.to_string(),
        }
    }
}

/// Errors raised while reading the agent configuration from the environment.
///
/// These are always fatal and are surfaced before any interface is touched.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid {variable} configuration: {value} ({reason})")]
    InvalidValue {
        variable: String,
        value: String,
        reason: String,
    },

    #[error("Missing {variable} configuration: {reason}")]
    MissingValue { variable: String, reason: String },
}

impl ConfigError {
    pub fn invalid(variable: &str, value: &str, reason: impl ToString) -> Self {
        ConfigError::InvalidValue {
            variable: variable.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors returned by a dataplane client.
#[derive(Error, Debug)]
pub enum DataplaneError {
    #[error("Dataplane request '{request}' failed: {message}")]
    RequestFailed { request: String, message: String },

    #[error("Unexpected dataplane reply to '{request}': {reply}")]
    UnexpectedReply { request: String, reply: String },

    #[error("Dataplane interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("I/O error talking to the dataplane: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type aliases for convenience
pub type UplinkResult<T> = Result<T, UplinkError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type DataplaneResult<T> = Result<T, DataplaneError>;
