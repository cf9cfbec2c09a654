//! State shared by the controller and every gateway task.

use super::events::GatewayEventSink;
use super::status::GatewayStatus;
use crate::config::{ChannelConfig, GatewayConfig, GatewaySettings};
use crate::error::{GatewayError, Result};
use crate::mac::{Address, DataFrame, FrameCodec, MacFrame, NodeClass, MAX_PAYLOAD_LEN};
use crate::registry::{DeviceRegistry, Node};
use crate::stats::{ChannelSnapshot, GatewayStats, StatsSnapshot};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

/// Encoded downlink handed to a channel task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TxRequest {
    pub addr: Address,
    pub frame: Vec<u8>,
    pub kind: TxKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TxKind {
    /// Class-B downlink; survives a sleep and goes out after wake.
    Scheduled,
    /// Reply in the receive window opened by an uplink. Only valid while
    /// the window is open. `requeue` holds the pending payload it carries.
    Window { requeue: Option<Vec<u8>> },
}

pub(crate) struct Shared {
    pub settings: GatewaySettings,
    pub config: GatewayConfig,
    pub channels: Vec<ChannelConfig>,
    pub registry: Mutex<DeviceRegistry>,
    pub sink: Arc<dyn GatewayEventSink>,
    pub codec: Arc<dyn FrameCodec>,
    pub ping_count: AtomicU32,
    pub stats: GatewayStats,
    pub tx_queues: Vec<mpsc::Sender<TxRequest>>,
    pub channel_status: Vec<watch::Receiver<GatewayStatus>>,
}

impl Shared {
    /// Lock the registry, recovering from a poisoned mutex.
    pub fn registry(&self) -> MutexGuard<'_, DeviceRegistry> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Device registry mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn ping_count(&self) -> u32 {
        self.ping_count.load(Ordering::Acquire)
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus::aggregate(self.channel_status.iter().map(|rx| *rx.borrow()))
    }

    pub fn encode(&self, frame: &MacFrame) -> Option<Vec<u8>> {
        match self.codec.encode(frame) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!("Failed to encode {:?}: {}", frame, e);
                None
            }
        }
    }

    /// Route a downlink by the node's delivery class.
    ///
    /// Class A payloads wait in the node's pending queue for its next
    /// receive window. Class B payloads go straight to the channel task.
    pub fn send_to(&self, addr: Address, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(GatewayError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        let node = {
            let mut registry = self.registry();
            let node = registry
                .get(addr)
                .cloned()
                .ok_or(GatewayError::NoSuchDevice(addr))?;

            if node.class == NodeClass::A {
                let queue = registry
                    .pending_mut(addr)
                    .ok_or(GatewayError::NoSuchDevice(addr))?;
                return match queue.push(payload.to_vec()) {
                    Ok(()) => {
                        debug!("Queued {} bytes for class A node {}", payload.len(), addr);
                        Ok(())
                    }
                    Err(_) => {
                        GatewayStats::incr(&self.stats.queue_overflows);
                        Err(GatewayError::QueueOverflow(addr))
                    }
                };
            }
            node
        };

        let frame = self
            .encode(&MacFrame::Data(DataFrame::downlink(addr, payload.to_vec())))
            .ok_or(GatewayError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            })?;
        let queue = self
            .tx_queues
            .get(node.channel)
            .ok_or(GatewayError::ChannelUnavailable(node.channel))?;

        match queue.try_send(TxRequest {
            addr,
            frame,
            kind: TxKind::Scheduled,
        }) {
            Ok(()) => {
                debug!(
                    "Scheduled {} bytes for class B node {} on channel {}",
                    payload.len(),
                    addr,
                    node.channel
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                GatewayStats::incr(&self.stats.queue_overflows);
                Err(GatewayError::QueueOverflow(addr))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(GatewayError::ChannelUnavailable(node.channel))
            }
        }
    }

    /// `send_to` every registered node; returns how many accepted it.
    pub fn broadcast(&self, payload: &[u8]) -> Result<usize> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(GatewayError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        let targets = self.registry().addresses();
        let mut scheduled = 0;
        for addr in targets {
            match self.send_to(addr, payload) {
                Ok(()) => scheduled += 1,
                Err(e) => warn!("Broadcast to {} failed: {}", addr, e),
            }
        }
        debug!("Broadcast scheduled for {} nodes", scheduled);
        Ok(scheduled)
    }

    /// Remove a node and notify the application.
    pub fn kick(&self, addr: Address) -> Result<Node> {
        let removed = self.registry().remove(addr);
        match removed {
            Some((node, discarded)) => {
                info!("Kicked node {} (dev {:016x})", addr, node.dev_id);
                self.after_removal(&node, discarded);
                Ok(node)
            }
            None => Err(GatewayError::NoSuchDevice(addr)),
        }
    }

    /// Remove every node that skipped more than `max_skipped_pings` pings.
    ///
    /// The scan and the removals happen under one lock, so a node heard in
    /// the meantime is never evicted on stale data.
    pub fn evict_stale(&self) -> Vec<Node> {
        let (ping_count, removed) = {
            let mut registry = self.registry();
            // No applied touch is newer than a count read under the lock.
            let ping_count = self.ping_count();
            let stale = registry.stale(ping_count, self.config.max_skipped_pings);
            let mut removed = Vec::with_capacity(stale.len());
            for addr in stale {
                if let Some(entry) = registry.remove(addr) {
                    removed.push(entry);
                }
            }
            (ping_count, removed)
        };

        removed
            .into_iter()
            .map(|(node, discarded)| {
                info!(
                    "Node {} (dev {:016x}) timed out after {} pings",
                    node.addr,
                    node.dev_id,
                    node.skipped_pings(ping_count)
                );
                self.after_removal(&node, discarded);
                node
            })
            .collect()
    }

    /// Put a payload from a missed receive window back at the head of the
    /// node's pending queue, or count it discarded if there is no room.
    pub fn requeue_pending(&self, addr: Address, payload: Vec<u8>) {
        let restored = self
            .registry()
            .pending_mut(addr)
            .map(|queue| queue.push_front(payload).is_ok());
        match restored {
            Some(true) => {
                debug!("Returned undelivered frame to the queue of {}", addr);
            }
            Some(false) => {
                warn!("Pending queue of {} refilled, discarding missed frame", addr);
                GatewayStats::incr(&self.stats.pending_discarded);
            }
            None => {
                debug!("Node {} left before its frame could be returned", addr);
                GatewayStats::incr(&self.stats.pending_discarded);
            }
        }
    }

    fn after_removal(&self, node: &Node, discarded: usize) {
        GatewayStats::incr(&self.stats.nodes_kicked);
        GatewayStats::add(&self.stats.pending_discarded, discarded as u64);
        if discarded > 0 {
            debug!("Discarded {} pending frames for {}", discarded, node.addr);
        }
        self.sink.node_kicked(node);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (nodes, pending_frames) = {
            let registry = self.registry();
            (registry.len(), registry.pending_total())
        };
        StatsSnapshot {
            uptime_secs: self.stats.uptime_secs(),
            gate_id: format!("{:016x}", self.settings.gate_id),
            status: self.status(),
            ping_count: self.ping_count(),
            nodes,
            pending_frames,
            channels: self
                .channels
                .iter()
                .zip(&self.channel_status)
                .map(|(cfg, rx)| ChannelSnapshot {
                    channel: cfg.channel,
                    data_rate: cfg.data_rate.index(),
                    status: *rx.borrow(),
                })
                .collect(),
            counters: self.stats.counters(),
        }
    }
}
