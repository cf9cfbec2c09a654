//! Gateway error type.

use crate::config::ConfigError;
use crate::mac::Address;
use std::fmt;

/// Errors returned by [`Gateway`](crate::Gateway) operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// A channel task could not be started.
    ChannelTaskStart {
        /// Index of the channel in the configured list.
        channel: usize,
        /// Driver or runtime failure.
        reason: String,
    },
    /// The timeout task could not be started.
    TimeoutTaskStart,
    /// No node is registered at this address.
    NoSuchDevice(Address),
    /// The node's pending queue or its channel's request queue is full.
    QueueOverflow(Address),
    /// Payload does not fit in a single data frame.
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Largest accepted payload.
        max: usize,
    },
    /// The channel task serving the node has stopped.
    ChannelUnavailable(usize),
    /// Invalid init arguments.
    InvalidConfig(&'static str),
    /// Configuration could not be loaded.
    Config(ConfigError),
    /// The gateway has been shut down.
    Stopped,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelTaskStart { channel, reason } => {
                write!(f, "failed to start channel {}: {}", channel, reason)
            }
            Self::TimeoutTaskStart => write!(f, "failed to start timeout task"),
            Self::NoSuchDevice(addr) => write!(f, "no device with address {}", addr),
            Self::QueueOverflow(addr) => write!(f, "downlink queue full for {}", addr),
            Self::PayloadTooLarge { len, max } => {
                write!(f, "payload too large: {} bytes (max {})", len, max)
            }
            Self::ChannelUnavailable(ch) => write!(f, "channel {} is not running", ch),
            Self::InvalidConfig(msg) => write!(f, "invalid gateway config: {}", msg),
            Self::Config(e) => write!(f, "{}", e),
            Self::Stopped => write!(f, "gateway has shut down"),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for GatewayError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidConfig(msg) => Self::InvalidConfig(msg),
            other => Self::Config(other),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, GatewayError>;
