//! # Outbound Smart Queue
//!
//! Holds messages that could not be transmitted because the socket is down.
//! Three lanes share one global capacity:
//!
//! - **Enqueue** appends to the lane of the message's priority.
//! - **Eviction** runs when the total size exceeds capacity: the oldest low
//!   priority messages go first, then the oldest normal ones. High priority
//!   messages are never evicted, so the queue may sit above capacity when it
//!   holds nothing but high priority traffic.
//! - **Dequeue** drains high before normal before low, FIFO inside a lane.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{OutboundKind, WireMessage};
use crate::utils::{current_datetime_rfc9557, now_ms};

/// Lane of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Typing indicators, presence queries. First to be evicted.
    Low = 0,
    /// Chat messages and conversation commands.
    Normal = 1,
    /// Retransmissions and delivery acks. Never evicted.
    High = 2,
}

/// A unit of application data destined for the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Wire `type` tag.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub priority: Priority,
    /// Assigned fresh on every transmission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Wall-clock enqueue time in Unix milliseconds.
    pub enqueued_at_ms: i64,
    /// How many times the ack sweep re-queued this message.
    #[serde(default)]
    pub retransmits: u32,
}

impl OutboundMessage {
    pub fn new(kind: impl Into<String>, data: Option<Value>, priority: Priority) -> Self {
        Self {
            kind: kind.into(),
            data,
            priority,
            correlation_id: None,
            enqueued_at_ms: now_ms(),
            retransmits: 0,
        }
    }

    /// Builds a message for a known command using its default lane.
    pub fn command(kind: OutboundKind, data: Option<Value>) -> Self {
        Self::new(kind.as_str(), data, kind.default_priority())
    }

    /// Whether the server is expected to confirm this message.
    pub fn expects_ack(&self) -> bool {
        OutboundKind::parse(&self.kind).is_some_and(|k| k.expects_ack())
    }

    /// The frame that goes on the socket.
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            kind: self.kind.clone(),
            data: self.data.clone(),
            error: None,
            timestamp: current_datetime_rfc9557(),
            correlation_id: self.correlation_id.clone(),
        }
    }
}

/// Three-lane bounded queue.
#[derive(Debug)]
pub struct SmartQueue {
    high: VecDeque<OutboundMessage>,
    normal: VecDeque<OutboundMessage>,
    low: VecDeque<OutboundMessage>,
    capacity: usize,
}

impl SmartQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            high: VecDeque::new(),
            normal: VecDeque::new(),
            low: VecDeque::new(),
            capacity,
        }
    }

    /// Appends `msg` to its lane and returns whatever capacity pressure evicted.
    pub fn enqueue(&mut self, msg: OutboundMessage) -> Vec<OutboundMessage> {
        self.lane_mut(msg.priority).push_back(msg);

        let mut evicted = Vec::new();
        while self.len() > self.capacity {
            let victim = self.low.pop_front().or_else(|| self.normal.pop_front());
            match victim {
                Some(m) => evicted.push(m),
                None => break,
            }
        }
        if !evicted.is_empty() {
            log::warn!(
                "Outbound queue over capacity ({}). Evicted {} message(s).",
                self.capacity,
                evicted.len()
            );
        }
        evicted
    }

    /// Removes the next message: high, then normal, then low.
    pub fn dequeue(&mut self) -> Option<OutboundMessage> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }

    /// Pushes a message back to the head of its lane (used when a send fails
    /// mid-flush so ordering is preserved).
    pub fn requeue_front(&mut self, msg: OutboundMessage) {
        self.lane_mut(msg.priority).push_front(msg);
    }

    /// Empties the queue in dequeue order.
    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(m) = self.dequeue() {
            out.push(m);
        }
        out
    }

    /// Clones the contents in dequeue order without removing them.
    pub fn snapshot(&self) -> Vec<OutboundMessage> {
        self.high
            .iter()
            .chain(self.normal.iter())
            .chain(self.low.iter())
            .cloned()
            .collect()
    }

    /// Re-enqueues a persisted backlog. Returns the evicted messages.
    pub fn restore(&mut self, messages: Vec<OutboundMessage>) -> Vec<OutboundMessage> {
        messages.into_iter().flat_map(|m| self.enqueue(m)).collect()
    }

    pub fn clear(&mut self) {
        self.high.clear();
        self.normal.clear();
        self.low.clear();
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lane_len(&self, priority: Priority) -> usize {
        match priority {
            Priority::High => self.high.len(),
            Priority::Normal => self.normal.len(),
            Priority::Low => self.low.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<OutboundMessage> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }
}
