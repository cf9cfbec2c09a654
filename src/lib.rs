//! LoRa-Star gateway MAC.
//!
//! Gateway side of a private star-topology LoRa network: multi-channel radio
//! management, join/accept handshake, device registry with liveness
//! tracking, and class A/B downlink scheduling.
//!
//! Everything here is platform-independent. Radios are reached through the
//! [`Transceiver`] trait; [`SimTransceiver`] runs the gateway on a host.

pub mod config;
pub mod error;
pub mod gateway;
pub mod lora;
pub mod mac;
pub mod registry;
pub mod stats;

// Re-export commonly used items
pub use config::{
    ChannelConfig, ConfigError, DataRate, GatewayConfig, GatewayManifest, GatewaySettings,
    JoinKey, PENDING_QUEUE_CAPACITY,
};
pub use error::{GatewayError, Result};
pub use gateway::{
    Gateway, GatewayEventSink, GatewayHandle, GatewayMonitor, GatewayStatus, RadioChannel,
};
pub use lora::{RadioError, RadioEvent, SimHandle, SimTransceiver, Transceiver};
pub use mac::{Address, FrameCodec, MacFrame, NodeClass, StarCodec, MAX_PAYLOAD_LEN};
pub use registry::Node;
pub use stats::{GatewayStats, StatsServer, StatsSnapshot};
