//! Gateway configuration.
//!
//! This module provides the configuration types consumed by [`Gateway::init`]:
//!
//! - [`settings`] - Network identity (`gate_id`, join key) and channel list
//! - [`tuning`] - Timing, queue depth and listen-before-talk tunables
//! - [`manifest`] - JSON manifest combining both, used by the simulator
//!
//! All types are platform-independent and host-testable.
//!
//! [`Gateway::init`]: crate::Gateway::init

mod manifest;
mod settings;
mod tuning;

use std::fmt;

pub use manifest::GatewayManifest;
pub use settings::{ChannelConfig, DataRate, GatewaySettings, JoinKey, JOIN_KEY_LEN};
pub use tuning::{GatewayConfig, PENDING_QUEUE_CAPACITY};

/// Errors produced while building or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A tunable is out of range or inconsistent with another.
    InvalidConfig(&'static str),
    /// Join key has the wrong length.
    InvalidJoinKey {
        /// Length that was supplied.
        len: usize,
    },
    /// Data rate index is not supported.
    InvalidDataRate(u8),
    /// Manifest could not be parsed.
    Manifest(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid gateway config: {}", msg),
            Self::InvalidJoinKey { len } => {
                write!(f, "join key must be {} bytes, got {}", JOIN_KEY_LEN, len)
            }
            Self::InvalidDataRate(dr) => write!(f, "unsupported data rate DR{}", dr),
            Self::Manifest(msg) => write!(f, "invalid manifest: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
