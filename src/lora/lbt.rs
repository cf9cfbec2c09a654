//! Listen-before-talk channel access.
//!
//! Before every downlink the channel task reads the channel RSSI. A channel
//! is free when the RSSI is at or below the configured threshold; otherwise
//! the task waits a random delay and senses again.
//!
//! # Backoff
//!
//! The delay window starts at `[min, 2*min)` and doubles with each busy
//! reading, capped at `max`. After `max_retries` busy readings the frame is
//! given up.
//!
//! ```
//! use lora_star_gate::lora::{Access, ListenBeforeTalk, LbtConfig};
//!
//! let mut lbt = ListenBeforeTalk::new(LbtConfig::default());
//! lbt.seed(7);
//!
//! assert_eq!(lbt.try_access(-110), Access::Transmit);
//! assert!(matches!(lbt.try_access(-60), Access::Backoff { .. }));
//! ```

use crate::config::GatewayConfig;

/// Listen-before-talk parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbtConfig {
    /// Channel is free when RSSI <= threshold (dBm).
    pub free_rssi_dbm: i16,
    /// Busy readings tolerated before giving up.
    pub max_retries: u8,
    /// Lower bound of every backoff (ms).
    pub min_delay_ms: u32,
    /// Upper bound of every backoff (ms).
    pub max_delay_ms: u32,
}

impl Default for LbtConfig {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for LbtConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            free_rssi_dbm: config.channel_free_rssi_dbm,
            max_retries: config.max_tx_retries,
            min_delay_ms: config.tx_delay_min_ms,
            max_delay_ms: config.tx_delay_max_ms,
        }
    }
}

/// Outcome of one channel access attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "ignoring the access decision could transmit on a busy channel"]
pub enum Access {
    /// Channel is free.
    Transmit,
    /// Channel is busy; sense again after `ms`.
    Backoff {
        /// Delay in milliseconds.
        ms: u32,
    },
    /// Too many busy readings; drop the frame.
    GiveUp,
}

/// Listen-before-talk state for one channel.
///
/// Call [`reset`](Self::reset) before each new frame.
#[derive(Debug)]
pub struct ListenBeforeTalk {
    config: LbtConfig,
    retries: u8,
    rng_state: u32,
}

impl ListenBeforeTalk {
    /// Create a new instance.
    pub fn new(config: LbtConfig) -> Self {
        Self {
            config,
            retries: 0,
            rng_state: 0x1234_5678,
        }
    }

    /// Seed the backoff generator (zero is mapped to one).
    pub fn seed(&mut self, seed: u32) {
        self.rng_state = seed.max(1);
    }

    /// Whether `rssi_dbm` counts as a free channel.
    pub fn is_free(&self, rssi_dbm: i16) -> bool {
        rssi_dbm <= self.config.free_rssi_dbm
    }

    /// Decide what to do given the current channel RSSI.
    pub fn try_access(&mut self, rssi_dbm: i16) -> Access {
        if self.is_free(rssi_dbm) {
            return Access::Transmit;
        }
        if self.retries >= self.config.max_retries {
            return Access::GiveUp;
        }
        let ms = self.next_delay();
        self.retries += 1;
        Access::Backoff { ms }
    }

    /// Start over for a new frame.
    pub fn reset(&mut self) {
        self.retries = 0;
    }

    /// Busy readings seen for the current frame.
    pub fn retries(&self) -> u8 {
        self.retries
    }

    fn next_delay(&mut self) -> u32 {
        let LbtConfig {
            min_delay_ms: min,
            max_delay_ms: max,
            ..
        } = self.config;
        let window = min.saturating_mul(1 << (self.retries + 1).min(10)).min(max);
        let span = window.saturating_sub(min);
        if span == 0 {
            return min;
        }
        min + self.next_random() % span
    }

    // Numerical Recipes LCG; only used for jitter.
    fn next_random(&mut self) -> u32 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(1_664_525)
            .wrapping_add(1_013_904_223);
        self.rng_state
    }
}
