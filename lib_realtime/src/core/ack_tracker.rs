//! # Acknowledgment Tracker
//!
//! Records every transmitted message that expects a server confirmation.
//! Entries leave the tracker in one of three ways:
//!
//! 1. a matching acknowledgment arrives (`acknowledge`);
//! 2. the periodic sweep finds them older than the timeout and hands the
//!    original message back for retransmission at high priority (`sweep`);
//! 3. capacity pressure evicts the oldest entry (`track`).
//!
//! Delivery is therefore at-least-once; duplicates are filtered on the
//! receiving side by the inbound dedup cache.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::core::queue::OutboundMessage;

/// A transmitted message awaiting confirmation.
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub correlation_id: String,
    pub message: OutboundMessage,
    pub sent_at: Instant,
}

/// Bounded map of in-flight messages keyed by correlation id.
#[derive(Debug)]
pub struct AckTracker {
    pending: HashMap<String, PendingAck>,
    // Insertion order for oldest-first eviction; may hold ids that were
    // already acknowledged, those are skipped lazily.
    order: VecDeque<String>,
    capacity: usize,
    timeout: Duration,
}

impl AckTracker {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            timeout,
        }
    }

    /// Starts tracking `message`, which must carry a correlation id.
    /// Returns the entry evicted to stay within capacity, if any.
    pub fn track(&mut self, message: OutboundMessage, now: Instant) -> Option<OutboundMessage> {
        let Some(correlation_id) = message.correlation_id.clone() else {
            log::debug!("Refusing to track '{}' without a correlation id", message.kind);
            return None;
        };

        self.order.push_back(correlation_id.clone());
        self.pending.insert(
            correlation_id.clone(),
            PendingAck {
                correlation_id,
                message,
                sent_at: now,
            },
        );

        let mut evicted = None;
        if self.pending.len() > self.capacity {
            while let Some(oldest) = self.order.pop_front() {
                if let Some(entry) = self.pending.remove(&oldest) {
                    log::warn!(
                        "Ack tracker full ({}). Discarding oldest pending '{}' ({})",
                        self.capacity,
                        entry.message.kind,
                        oldest
                    );
                    evicted = Some(entry.message);
                    break;
                }
            }
        }

        if self.order.len() > self.capacity * 2 {
            let pending = &self.pending;
            self.order.retain(|id| pending.contains_key(id));
        }
        evicted
    }

    /// Removes the entry for `correlation_id`; `None` for unknown or already
    /// settled ids.
    pub fn acknowledge(&mut self, correlation_id: &str) -> Option<PendingAck> {
        self.pending.remove(correlation_id)
    }

    /// Removes and returns every message older than the timeout, oldest first.
    pub fn sweep(&mut self, now: Instant) -> Vec<OutboundMessage> {
        let timeout = self.timeout;
        let mut expired: Vec<PendingAck> = Vec::new();
        self.pending.retain(|_, entry| {
            if now.saturating_duration_since(entry.sent_at) >= timeout {
                expired.push(entry.clone());
                false
            } else {
                true
            }
        });
        if !expired.is_empty() {
            let pending = &self.pending;
            self.order.retain(|id| pending.contains_key(id));
        }
        expired.sort_by_key(|e| e.sent_at);
        expired.into_iter().map(|e| e.message).collect()
    }

    /// In-flight messages, oldest first (used for backlog persistence).
    pub fn messages(&self) -> Vec<OutboundMessage> {
        let mut entries: Vec<&PendingAck> = self.pending.values().collect();
        entries.sort_by_key(|e| e.sent_at);
        entries.into_iter().map(|e| e.message.clone()).collect()
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.pending.contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::queue::Priority;

    fn sent(id: &str) -> OutboundMessage {
        let mut m = OutboundMessage::new("message:send", None, Priority::Normal);
        m.correlation_id = Some(id.to_string());
        m
    }

    #[test]
    fn acknowledgment_removes_entry_immediately() {
        let mut t = AckTracker::new(10, Duration::from_secs(10));
        let now = Instant::now();
        t.track(sent("a"), now);
        assert!(t.contains("a"));

        let ack = t.acknowledge("a").expect("pending entry");
        assert_eq!(ack.correlation_id, "a");
        assert!(t.is_empty());
        assert!(t.acknowledge("a").is_none());
    }

    #[test]
    fn sweep_returns_only_timed_out_messages() {
        let mut t = AckTracker::new(10, Duration::from_secs(10));
        let start = Instant::now();
        t.track(sent("old"), start);
        t.track(sent("new"), start + Duration::from_secs(8));

        assert!(t.sweep(start + Duration::from_secs(9)).is_empty());

        let expired = t.sweep(start + Duration::from_secs(11));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].correlation_id.as_deref(), Some("old"));
        assert!(t.contains("new"));
        assert!(!t.contains("old"));
    }

    #[test]
    fn capacity_evicts_oldest_pending() {
        let mut t = AckTracker::new(2, Duration::from_secs(10));
        let now = Instant::now();
        assert!(t.track(sent("a"), now).is_none());
        assert!(t.track(sent("b"), now).is_none());
        t.acknowledge("a");
        assert!(t.track(sent("c"), now).is_none());

        let evicted = t.track(sent("d"), now).expect("oldest evicted");
        assert_eq!(evicted.correlation_id.as_deref(), Some("b"));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn messages_without_correlation_id_are_not_tracked() {
        let mut t = AckTracker::new(2, Duration::from_secs(10));
        t.track(OutboundMessage::new("message:send", None, Priority::Normal), Instant::now());
        assert!(t.is_empty());
    }
}
