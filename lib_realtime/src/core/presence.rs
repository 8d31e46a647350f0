//! Bounded cache of remote users' online status.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::protocol::{InboundKind, WireMessage};
use crate::utils::{safe_map, string_field};

/// Cached status of one remote user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub online: bool,
    pub last_seen: Option<String>,
    pub last_active: Option<String>,
}

#[derive(Debug)]
pub struct PresenceCache {
    // user id -> (entry, insertion sequence)
    entries: HashMap<String, (PresenceEntry, u64)>,
    capacity: usize,
    seq: u64,
}

impl PresenceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            seq: 0,
        }
    }

    /// Feeds a presence event into the cache. Returns how many users changed.
    pub fn apply(&mut self, msg: &WireMessage) -> usize {
        let Some(data) = msg.data.as_ref() else {
            return 0;
        };
        match msg.inbound_kind() {
            InboundKind::PresenceOnline => self.apply_one(data, Some(true)) as usize,
            InboundKind::PresenceOffline => self.apply_one(data, Some(false)) as usize,
            InboundKind::PresenceSnapshot => {
                // Either `{"users": [...]}` or a bare array.
                let users = data.get("users").or(Some(data));
                safe_map(users, |u| self.apply_one(u, None).then_some(())).len()
            }
            _ => 0,
        }
    }

    fn apply_one(&mut self, user: &Value, online: Option<bool>) -> bool {
        let Some(user_id) = string_field(user, "userId") else {
            log::debug!("Presence update without userId ignored");
            return false;
        };
        let online = online
            .or_else(|| user.get("online").and_then(Value::as_bool))
            .unwrap_or(false);
        let entry = PresenceEntry {
            online,
            last_seen: string_field(user, "lastSeen"),
            last_active: string_field(user, "lastActive"),
        };
        self.insert(user_id, entry);
        true
    }

    /// Inserts or replaces an entry, evicting the oldest beyond capacity.
    pub fn insert(&mut self, user_id: String, entry: PresenceEntry) {
        self.seq += 1;
        let seq = self.seq;
        match self.entries.get_mut(&user_id) {
            Some(slot) => {
                // Keep timestamps the update did not carry.
                let (old, _) = &*slot;
                let merged = PresenceEntry {
                    online: entry.online,
                    last_seen: entry.last_seen.or_else(|| old.last_seen.clone()),
                    last_active: entry.last_active.or_else(|| old.last_active.clone()),
                };
                *slot = (merged, seq);
            }
            None => {
                self.entries.insert(user_id, (entry, seq));
            }
        }

        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, s))| *s)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    self.entries.remove(&k);
                }
                None => break,
            }
        }
    }

    pub fn get(&self, user_id: &str) -> Option<PresenceEntry> {
        self.entries.get(user_id).map(|(e, _)| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
