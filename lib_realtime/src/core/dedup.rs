//! Inbound duplicate suppression.
//!
//! The server may redeliver an event after a reconnect. Each event maps to an
//! identity string; an identity seen again within the window is dropped.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::protocol::WireMessage;
use crate::utils::string_field;

// Fields that name one server event. `conversationId` is not among them:
// every update to a conversation carries it.
const IDENTITY_KEYS: [&str; 4] = ["id", "messageId", "proposalId", "correlationId"];

/// `type` plus the first event id in `data`, falling back to a digest of the
/// whole payload. `None` for events that carry the latest state of a user or
/// a conversation: a later copy is an update, never a redelivery.
pub fn event_identity(msg: &WireMessage) -> Option<String> {
    if msg.inbound_kind().carries_state() {
        return None;
    }
    let Some(data) = msg.data.as_ref() else {
        return Some(format!("{}:-", msg.kind));
    };
    if let Some(id) = IDENTITY_KEYS.iter().find_map(|key| string_field(data, key)) {
        return Some(format!("{}:{}", msg.kind, id));
    }
    Some(format!("{}:#{:016x}", msg.kind, digest(data)))
}

fn digest(data: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    hash_value(data, &mut hasher);
    hasher.finish()
}

// Object keys are visited sorted so insertion order never changes the digest.
fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => (1u8, b).hash(state),
        Value::Number(n) => (2u8, n.to_string()).hash(state),
        Value::String(s) => (3u8, s).hash(state),
        Value::Array(items) => {
            (4u8, items.len()).hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            (5u8, map.len()).hash(state);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                key.hash(state);
                hash_value(&map[key.as_str()], state);
            }
        }
    }
}

/// Time-windowed set of identities.
#[derive(Debug)]
pub struct DedupCache {
    seen: HashMap<String, Instant>,
    window: Duration,
}

impl DedupCache {
    pub fn new(window: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            window,
        }
    }

    /// Returns true the first time `identity` is seen inside the window.
    /// Expired identities are pruned on every call.
    pub fn first_seen(&mut self, identity: &str, now: Instant) -> bool {
        let window = self.window;
        self.seen
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) < window);

        if self.seen.contains_key(identity) {
            return false;
        }
        self.seen.insert(identity.to_string(), now);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}
