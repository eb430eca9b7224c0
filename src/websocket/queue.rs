//! Bounded outbound queue for sends issued while disconnected.

use std::collections::VecDeque;

use tracing::debug;

use super::Frame;

/// FIFO of frames waiting for a connection. When full, the oldest frame is
/// dropped so that only the most recent `capacity` sends survive.
#[derive(Debug)]
pub struct OutboundQueue {
    frames: VecDeque<Frame>,
    capacity: usize,
    dropped: u64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Queue a frame, evicting the oldest one if the queue is full.
    /// Returns the evicted frame, if any.
    pub fn push(&mut self, frame: Frame) -> Option<Frame> {
        let evicted = if self.frames.len() >= self.capacity {
            self.dropped += 1;
            self.frames.pop_front()
        } else {
            None
        };
        if let Some(ref old) = evicted {
            debug!(event = %old.event, "outbound queue full, dropping oldest frame");
        }
        self.frames.push_back(frame);
        evicted
    }

    /// Take every queued frame in FIFO order.
    pub fn drain(&mut self) -> Vec<Frame> {
        self.frames.drain(..).collect()
    }

    /// Put frames back at the front, preserving their order. Used when a
    /// flush fails part way through.
    pub fn requeue_front(&mut self, frames: Vec<Frame>) {
        for frame in frames.into_iter().rev() {
            self.frames.push_front(frame);
        }
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
            self.dropped += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of frames evicted since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
