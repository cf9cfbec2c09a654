//! Bounded per-node downlink queue.

use crate::config::PENDING_QUEUE_CAPACITY;
use heapless::Deque;

/// FIFO of downlink payloads waiting for a class-A receive window.
///
/// Capacity is fixed at [`PENDING_QUEUE_CAPACITY`]; pushing into a full
/// queue hands the payload back instead of dropping anything.
#[derive(Debug, Default)]
pub struct PendingQueue {
    frames: Deque<Vec<u8>, PENDING_QUEUE_CAPACITY>,
}

impl PendingQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            frames: Deque::new(),
        }
    }

    /// Append a payload; returns it back if the queue is full.
    pub fn push(&mut self, payload: Vec<u8>) -> Result<(), Vec<u8>> {
        self.frames.push_back(payload)
    }

    /// Put a payload back at the head; returns it back if the queue is full.
    pub fn push_front(&mut self, payload: Vec<u8>) -> Result<(), Vec<u8>> {
        self.frames.push_front(payload)
    }

    /// Take the oldest payload.
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    /// Number of queued payloads.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop everything; returns how many payloads were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.frames.len();
        self.frames.clear();
        n
    }
}
