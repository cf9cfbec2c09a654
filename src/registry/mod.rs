//! Joined-node bookkeeping.
//!
//! This module provides:
//! - [`DeviceRegistry`]: Address-indexed table of joined nodes
//! - [`PendingQueue`]: Bounded downlink queue owned by each class-A node

mod devices;
mod pending;

pub use devices::{DeviceRegistry, JoinOutcome, Node, RegistryError};
pub use pending::PendingQueue;
