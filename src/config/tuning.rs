//! Gateway tunables.
//!
//! Defaults follow the LoRa-Star reference gateway: a 3 second ping period,
//! eviction after 60 skipped pings, and a 100-1000 ms randomized transmit
//! delay when the channel is sensed busy.

use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capacity of the per-node pending downlink queue (class A).
pub const PENDING_QUEUE_CAPACITY: usize = 8;

/// Runtime tunables for a gateway instance.
///
/// Note: This is `Copy` for efficient passing to worker tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Ping counter increment period in milliseconds.
    pub ping_period_ms: u64,
    /// A node that skipped more pings than this is kicked.
    pub max_skipped_pings: u32,
    /// Minimum backoff when the channel is busy (ms).
    pub tx_delay_min_ms: u32,
    /// Maximum backoff when the channel is busy (ms).
    pub tx_delay_max_ms: u32,
    /// Busy-channel retries before a downlink is dropped.
    pub max_tx_retries: u8,
    /// RSSI at or below which the channel is considered free (dBm).
    pub channel_free_rssi_dbm: i16,
    /// Delay between a class-A uplink and its receive window (ms).
    pub rx_window_delay_ms: u64,
    /// Maximum time to wait for transmit completion (ms).
    pub tx_timeout_ms: u64,
    /// Depth of each channel's inbound radio event queue.
    pub event_queue_depth: usize,
    /// Depth of each channel's transmit request queue.
    pub tx_queue_depth: usize,
    /// Depth of the timeout task's command queue.
    pub timer_queue_depth: usize,
    /// Maximum number of joined nodes.
    pub max_nodes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ping_period_ms: 3_000,
            max_skipped_pings: 60,
            tx_delay_min_ms: 100,
            tx_delay_max_ms: 1_000,
            max_tx_retries: 8,
            channel_free_rssi_dbm: -100,
            rx_window_delay_ms: 1_000,
            tx_timeout_ms: 5_000,
            event_queue_depth: 16,
            tx_queue_depth: 16,
            timer_queue_depth: 10,
            max_nodes: 256,
        }
    }
}

impl GatewayConfig {
    /// Ping counter increment period.
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    /// Delay before a receive-window downlink.
    pub fn rx_window_delay(&self) -> Duration {
        Duration::from_millis(self.rx_window_delay_ms)
    }

    /// Transmit completion timeout.
    pub fn tx_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_timeout_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_period_ms == 0 {
            return Err(ConfigError::InvalidConfig("ping_period_ms must be > 0"));
        }
        if self.max_skipped_pings == 0 {
            return Err(ConfigError::InvalidConfig("max_skipped_pings must be > 0"));
        }
        if self.max_skipped_pings > u32::MAX / 2 {
            return Err(ConfigError::InvalidConfig(
                "max_skipped_pings must be at most half the ping counter range",
            ));
        }
        if self.tx_delay_min_ms == 0 {
            return Err(ConfigError::InvalidConfig("tx_delay_min_ms must be > 0"));
        }
        if self.tx_delay_max_ms < self.tx_delay_min_ms {
            return Err(ConfigError::InvalidConfig(
                "tx_delay_max_ms must be >= tx_delay_min_ms",
            ));
        }
        if self.max_tx_retries == 0 {
            return Err(ConfigError::InvalidConfig("max_tx_retries must be > 0"));
        }
        if !(-140..=-40).contains(&self.channel_free_rssi_dbm) {
            return Err(ConfigError::InvalidConfig(
                "channel_free_rssi_dbm must be within -140..=-40 dBm",
            ));
        }
        if self.tx_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig("tx_timeout_ms must be > 0"));
        }
        if self.event_queue_depth == 0 || self.tx_queue_depth == 0 || self.timer_queue_depth == 0
        {
            return Err(ConfigError::InvalidConfig("queue depths must be > 0"));
        }
        if self.max_nodes == 0 {
            return Err(ConfigError::InvalidConfig("max_nodes must be > 0"));
        }
        Ok(())
    }
}
