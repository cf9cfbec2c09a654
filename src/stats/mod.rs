//! Gateway statistics.
//!
//! [`GatewayStats`] is shared by every gateway task and updated without
//! locking. [`StatsServer`] serves a JSON snapshot on `/stats`.
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 3600,
//!   "gate_id": "00000000cafe0001",
//!   "status": "listening",
//!   "ping_count": 1200,
//!   "nodes": 12,
//!   "pending_frames": 3,
//!   "channels": [{ "channel": 0, "data_rate": 3, "status": "listening" }],
//!   "counters": { "uplinks": 420, "downlinks": 97, "joins_accepted": 12, ... }
//! }
//! ```

mod server;

use crate::gateway::GatewayStatus;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub use server::{StatsServer, DEFAULT_STATS_PORT};

/// Lock-free gateway counters.
#[derive(Debug)]
pub struct GatewayStats {
    start_time: Instant,
    /// Frames received with a valid CRC.
    pub uplinks: AtomicU64,
    /// Frames put on the air.
    pub downlinks: AtomicU64,
    /// Frames received with a bad CRC.
    pub crc_errors: AtomicU64,
    /// Frames the codec could not decode.
    pub decode_errors: AtomicU64,
    /// Join requests dropped for a bad MIC.
    pub mic_failures: AtomicU64,
    /// Joins admitted.
    pub joins_accepted: AtomicU64,
    /// Joins refused by the application or a full registry.
    pub joins_rejected: AtomicU64,
    /// Nodes removed by timeout or `kick`.
    pub nodes_kicked: AtomicU64,
    /// Listen-before-talk backoffs taken.
    pub lbt_backoffs: AtomicU64,
    /// Downlinks dropped after too many busy readings.
    pub lbt_dropped: AtomicU64,
    /// `send_to` calls refused with a full queue.
    pub queue_overflows: AtomicU64,
    /// Pending frames discarded by re-join or eviction.
    pub pending_discarded: AtomicU64,
    /// Ping ticks the timeout task never saw.
    pub pings_skipped: AtomicU64,
}

impl GatewayStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            uplinks: AtomicU64::new(0),
            downlinks: AtomicU64::new(0),
            crc_errors: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            mic_failures: AtomicU64::new(0),
            joins_accepted: AtomicU64::new(0),
            joins_rejected: AtomicU64::new(0),
            nodes_kicked: AtomicU64::new(0),
            lbt_backoffs: AtomicU64::new(0),
            lbt_dropped: AtomicU64::new(0),
            queue_overflows: AtomicU64::new(0),
            pending_discarded: AtomicU64::new(0),
            pings_skipped: AtomicU64::new(0),
        }
    }

    /// Bump a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump a counter by `n`.
    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Seconds since the gateway started.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Point-in-time copy of all counters.
    pub fn counters(&self) -> CounterSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            uplinks: get(&self.uplinks),
            downlinks: get(&self.downlinks),
            crc_errors: get(&self.crc_errors),
            decode_errors: get(&self.decode_errors),
            mic_failures: get(&self.mic_failures),
            joins_accepted: get(&self.joins_accepted),
            joins_rejected: get(&self.joins_rejected),
            nodes_kicked: get(&self.nodes_kicked),
            lbt_backoffs: get(&self.lbt_backoffs),
            lbt_dropped: get(&self.lbt_dropped),
            queue_overflows: get(&self.queue_overflows),
            pending_discarded: get(&self.pending_discarded),
            pings_skipped: get(&self.pings_skipped),
        }
    }
}

impl Default for GatewayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter values at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub uplinks: u64,
    pub downlinks: u64,
    pub crc_errors: u64,
    pub decode_errors: u64,
    pub mic_failures: u64,
    pub joins_accepted: u64,
    pub joins_rejected: u64,
    pub nodes_kicked: u64,
    pub lbt_backoffs: u64,
    pub lbt_dropped: u64,
    pub queue_overflows: u64,
    pub pending_discarded: u64,
    pub pings_skipped: u64,
}

/// State of one channel in a [`StatsSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    /// Channel number.
    pub channel: u8,
    /// Data rate index.
    pub data_rate: u8,
    /// Current channel status.
    pub status: GatewayStatus,
}

/// Everything the `/stats` endpoint reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    /// Gateway id as 16 hex digits.
    pub gate_id: String,
    pub status: GatewayStatus,
    pub ping_count: u32,
    pub nodes: usize,
    pub pending_frames: usize,
    pub channels: Vec<ChannelSnapshot>,
    pub counters: CounterSnapshot,
}

impl StatsSnapshot {
    /// Serialize to JSON.
    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
