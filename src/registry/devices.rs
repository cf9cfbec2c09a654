//! Device registry.
//!
//! Maps network addresses to joined nodes. Each entry carries the node's
//! delivery class, last-seen ping count, assigned channel and its pending
//! downlink queue.
//!
//! # Invariants
//!
//! - An address identifies at most one node.
//! - A device id maps to at most one address; re-joining keeps the address
//!   and replaces the entry.
//! - Address 0 and [`BROADCAST_ADDRESS`] are never assigned.
//!
//! The registry itself is not synchronized; the gateway wraps it in a single
//! mutex.

use super::PendingQueue;
use crate::mac::{Address, NodeClass, BROADCAST_ADDRESS};
use std::collections::HashMap;
use std::fmt;

/// Snapshot of a joined node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Device identifier.
    pub dev_id: u64,
    /// Application identifier from the join request.
    pub app_id: u64,
    /// Assigned network address.
    pub addr: Address,
    /// Delivery class.
    pub class: NodeClass,
    /// Ping count when the node was last heard.
    pub last_seen_ping: u32,
    /// Index of the channel the node was last heard on.
    pub channel: usize,
}

impl Node {
    /// Ping periods elapsed since the node was last heard.
    pub fn skipped_pings(&self, ping_count: u32) -> u32 {
        ping_count.wrapping_sub(self.last_seen_ping)
    }

    /// Whether more than `max_skipped` pings passed since the node was heard.
    ///
    /// A node heard after `ping_count` was sampled reads as a huge wrapped
    /// distance; anything past half the counter range counts as fresh.
    pub fn is_stale(&self, ping_count: u32, max_skipped: u32) -> bool {
        let skipped = self.skipped_pings(ping_count);
        skipped > max_skipped && skipped <= u32::MAX / 2
    }
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// New entry.
    Joined(Node),
    /// The device was already registered; its entry was replaced.
    Rejoined {
        /// The replacement entry.
        node: Node,
        /// Pending frames dropped with the old entry.
        discarded: usize,
    },
}

impl JoinOutcome {
    /// The registered node.
    pub fn node(&self) -> &Node {
        match self {
            Self::Joined(node) | Self::Rejoined { node, .. } => node,
        }
    }
}

/// Registry errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// Registry holds `capacity` nodes already.
    Full {
        /// Maximum number of nodes.
        capacity: usize,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full { capacity } => write!(f, "device registry full ({} nodes)", capacity),
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Debug)]
struct Entry {
    node: Node,
    pending: PendingQueue,
}

/// Address-indexed table of joined nodes.
#[derive(Debug)]
pub struct DeviceRegistry {
    entries: HashMap<Address, Entry>,
    by_device: HashMap<u64, Address>,
    next_addr: u32,
    capacity: usize,
}

impl DeviceRegistry {
    /// Create an empty registry holding at most `capacity` nodes.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            by_device: HashMap::with_capacity(capacity),
            next_addr: 1,
            capacity,
        }
    }

    /// Register a node, or replace its entry if the device already joined.
    ///
    /// A re-join keeps the device's address, resets its last-seen ping
    /// count, and discards any frames still pending for it.
    pub fn join(
        &mut self,
        dev_id: u64,
        app_id: u64,
        class: NodeClass,
        channel: usize,
        ping_count: u32,
    ) -> Result<JoinOutcome, RegistryError> {
        if let Some(&addr) = self.by_device.get(&dev_id) {
            if let Some(entry) = self.entries.get_mut(&addr) {
                let discarded = entry.pending.clear();
                entry.node = Node {
                    dev_id,
                    app_id,
                    addr,
                    class,
                    last_seen_ping: ping_count,
                    channel,
                };
                return Ok(JoinOutcome::Rejoined {
                    node: entry.node.clone(),
                    discarded,
                });
            }
        }

        if self.entries.len() >= self.capacity {
            return Err(RegistryError::Full {
                capacity: self.capacity,
            });
        }

        let addr = self.allocate_address();
        let node = Node {
            dev_id,
            app_id,
            addr,
            class,
            last_seen_ping: ping_count,
            channel,
        };
        self.entries.insert(
            addr,
            Entry {
                node: node.clone(),
                pending: PendingQueue::new(),
            },
        );
        self.by_device.insert(dev_id, addr);
        Ok(JoinOutcome::Joined(node))
    }

    /// Look up a node by address.
    pub fn get(&self, addr: Address) -> Option<&Node> {
        self.entries.get(&addr).map(|e| &e.node)
    }

    /// Record that a node was heard on `channel` at `ping_count`.
    ///
    /// The node follows the channel it was last heard on, so class-B
    /// downlinks go where receive-window replies go.
    pub fn touch(&mut self, addr: Address, channel: usize, ping_count: u32) -> Option<Node> {
        let entry = self.entries.get_mut(&addr)?;
        entry.node.last_seen_ping = ping_count;
        entry.node.channel = channel;
        Some(entry.node.clone())
    }

    /// Pending queue of a node.
    pub fn pending_mut(&mut self, addr: Address) -> Option<&mut PendingQueue> {
        self.entries.get_mut(&addr).map(|e| &mut e.pending)
    }

    /// Number of frames pending for a node.
    pub fn pending_len(&self, addr: Address) -> Option<usize> {
        self.entries.get(&addr).map(|e| e.pending.len())
    }

    /// Remove a node; returns it with the number of pending frames dropped.
    pub fn remove(&mut self, addr: Address) -> Option<(Node, usize)> {
        let mut entry = self.entries.remove(&addr)?;
        self.by_device.remove(&entry.node.dev_id);
        let discarded = entry.pending.clear();
        Some((entry.node, discarded))
    }

    /// Addresses of nodes that skipped more than `max_skipped` pings.
    pub fn stale(&self, ping_count: u32, max_skipped: u32) -> Vec<Address> {
        self.entries
            .values()
            .filter(|e| e.node.is_stale(ping_count, max_skipped))
            .map(|e| e.node.addr)
            .collect()
    }

    /// Iterate over registered nodes.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.entries.values().map(|e| &e.node)
    }

    /// Addresses of all registered nodes.
    pub fn addresses(&self) -> Vec<Address> {
        self.entries.keys().copied().collect()
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no node is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total frames pending across all nodes.
    pub fn pending_total(&self) -> usize {
        self.entries.values().map(|e| e.pending.len()).sum()
    }

    fn allocate_address(&mut self) -> Address {
        // Capacity is far below the address space, so a free slot is always
        // found within len() + 2 attempts.
        loop {
            let candidate = Address(self.next_addr);
            self.next_addr = self.next_addr.wrapping_add(1);
            if candidate.0 == 0 || candidate == BROADCAST_ADDRESS {
                continue;
            }
            if !self.entries.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}
