//! Outcome of a best-effort restoration.
//!
//! Restoration never stops at the first error. Every step's result is
//! recorded here, failures are logged as they happen, and the caller gets
//! the full list back.

use std::fmt;

use tracing::{debug, warn};

use vpp_uplink_shared::errors::{UplinkError, UplinkResult};
use vpp_uplink_shared::{InterfaceAddress, InterfaceRoute};

/// One step of a restoration.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreStep {
    MoveFromNamespace,
    RebindKernelDriver,
    WaitForInterface,
    LookupLink,
    SetUp,
    SetPromiscOff,
    RestoreMtu,
    AddAddress(InterfaceAddress),
    AddRoute(InterfaceRoute),
}

impl fmt::Display for RestoreStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreStep::MoveFromNamespace => write!(f, "move back from dataplane namespace"),
            RestoreStep::RebindKernelDriver => write!(f, "rebind kernel driver"),
            RestoreStep::WaitForInterface => write!(f, "wait for interface"),
            RestoreStep::LookupLink => write!(f, "look up link"),
            RestoreStep::SetUp => write!(f, "set link up"),
            RestoreStep::SetPromiscOff => write!(f, "set promisc off"),
            RestoreStep::RestoreMtu => write!(f, "restore mtu"),
            RestoreStep::AddAddress(addr) => write!(f, "add address {}", addr),
            RestoreStep::AddRoute(route) => write!(f, "add route {}", route),
        }
    }
}

#[derive(Debug)]
pub struct StepFailure {
    pub step: RestoreStep,
    pub error: UplinkError,
}

/// Per-interface restoration report.
#[derive(Debug)]
pub struct RestoreReport {
    interface: String,
    completed: Vec<RestoreStep>,
    failures: Vec<StepFailure>,
    skipped: Option<String>,
}

impl RestoreReport {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            completed: Vec::new(),
            failures: Vec::new(),
            skipped: None,
        }
    }

    /// Records the result of a step. Returns whether it succeeded.
    pub fn record(&mut self, step: RestoreStep, result: UplinkResult<()>) -> bool {
        match result {
            Ok(()) => {
                debug!("Restore {}: {} done", self.interface, step);
                self.completed.push(step);
                true
            }
            Err(error) => {
                warn!("Restore {}: {} failed: {}", self.interface, step, error);
                self.failures.push(StepFailure { step, error });
                false
            }
        }
    }

    /// Marks the remaining steps as intentionally not run.
    pub fn skip_remaining(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!("Restore {}: skipping remaining steps, {}", self.interface, reason);
        self.skipped = Some(reason);
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[StepFailure] {
        &self.failures
    }

    pub fn failed(&self, step: &RestoreStep) -> bool {
        self.failures.iter().any(|f| &f.step == step)
    }

    pub fn completed(&self, step: &RestoreStep) -> bool {
        self.completed.contains(step)
    }

    pub fn skipped(&self) -> Option<&str> {
        self.skipped.as_deref()
    }
}

impl fmt::Display for RestoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} steps done, {} failed",
            self.interface,
            self.completed.len(),
            self.failures.len()
        )?;
        if let Some(reason) = &self.skipped {
            write!(f, ", rest skipped ({})", reason)?;
        }
        Ok(())
    }
}
