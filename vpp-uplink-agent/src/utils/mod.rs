//! Utilities module for the uplink agent.
//!
//! This module provides shared utility functions and helpers used across
//! the agent components.

pub mod error_handling;
