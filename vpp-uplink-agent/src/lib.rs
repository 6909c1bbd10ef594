//! Library crate exposing modules for testing
//!
//! This exposes internal modules for integration tests and the
//! `debug-state` tool.

pub mod config;
pub mod dataplane;
pub mod inspector;
pub mod kernel;
pub mod lifecycle;
pub mod mover;
pub mod netlink;
pub mod netns;
pub mod state_store;
pub mod sysfs;
pub mod uplink;
pub mod utils;
