//! Client-side view of conversations and their latest proposal.
//!
//! The server pushes partial updates; this cache folds them into one summary
//! per conversation so a consumer can render a list without re-fetching.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::protocol::{InboundKind, WireMessage};
use crate::utils::{safe_filter, safe_find, string_field};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Received,
    Accepted,
    Rejected,
    Expired,
}

impl ProposalStatus {
    fn from_kind(kind: &InboundKind) -> Option<Self> {
        match kind {
            InboundKind::ProposalReceived => Some(Self::Received),
            InboundKind::ProposalAccepted => Some(Self::Accepted),
            InboundKind::ProposalRejected => Some(Self::Rejected),
            InboundKind::ProposalExpired => Some(Self::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub last_message: Option<Value>,
    pub unread_count: u64,
    pub updated_at: Option<String>,
    pub proposal_id: Option<String>,
    pub proposal_status: Option<ProposalStatus>,
    pub delivery_confirmed: bool,
    pub service_cancelled: bool,
}

#[derive(Debug, Default)]
pub struct ConversationCache {
    by_id: HashMap<String, ConversationSummary>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds an inbound event into the cache. Returns true when something changed.
    pub fn apply(&mut self, msg: &WireMessage) -> bool {
        let Some(data) = msg.data.as_ref() else {
            return false;
        };
        let kind = msg.inbound_kind();

        match &kind {
            InboundKind::ConversationsUpdate | InboundKind::ConversationsList => {
                let list = data.get("conversations").or(Some(data));
                let mut changed = false;
                for summary in safe_filter(list, Value::is_object) {
                    changed |= self.merge_summary(summary);
                }
                return changed;
            }
            InboundKind::ConversationUpdated => return self.merge_summary(data),
            _ => {}
        }

        let Some(conversation_id) = string_field(data, "conversationId") else {
            return false;
        };

        match kind {
            InboundKind::MessageNew => {
                let entry = self.entry(&conversation_id);
                entry.last_message = Some(data.clone());
                entry.unread_count += 1;
                entry.updated_at = string_field(data, "createdAt").or_else(|| Some(msg.timestamp.clone()));
            }
            InboundKind::MessageRead => {
                let entry = self.entry(&conversation_id);
                let unread = unread_after_read(entry, data.get("messageIds"));
                entry.unread_count = unread;
            }
            InboundKind::DeliveryConfirmed => self.entry(&conversation_id).delivery_confirmed = true,
            InboundKind::ServiceCancelled => self.entry(&conversation_id).service_cancelled = true,
            ref k if k.is_proposal() => {
                let entry = self.entry(&conversation_id);
                entry.proposal_status = ProposalStatus::from_kind(k);
                if let Some(pid) = string_field(data, "proposalId") {
                    entry.proposal_id = Some(pid);
                }
            }
            _ => return false,
        }
        true
    }

    // Accepts `id` or `conversationId`; only fields present in the update are
    // overwritten.
    fn merge_summary(&mut self, update: &Value) -> bool {
        let Some(id) = string_field(update, "conversationId").or_else(|| string_field(update, "id")) else {
            return false;
        };
        let entry = self.entry(&id);
        if let Some(last) = update.get("lastMessage").filter(|v| !v.is_null()) {
            entry.last_message = Some(last.clone());
        }
        if let Some(n) = update.get("unreadCount").and_then(Value::as_u64) {
            entry.unread_count = n;
        }
        if let Some(ts) = string_field(update, "updatedAt") {
            entry.updated_at = Some(ts);
        }
        true
    }

    fn entry(&mut self, id: &str) -> &mut ConversationSummary {
        self.by_id
            .entry(id.to_string())
            .or_insert_with(|| ConversationSummary {
                conversation_id: id.to_string(),
                ..ConversationSummary::default()
            })
    }

    pub fn get(&self, conversation_id: &str) -> Option<ConversationSummary> {
        self.by_id.get(conversation_id).cloned()
    }

    /// All conversations, most recently updated first.
    pub fn list(&self) -> Vec<ConversationSummary> {
        let mut all: Vec<ConversationSummary> = self.by_id.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
    }
}

// A receipt without ids, or one naming the newest message, reads everything.
// Otherwise only the listed messages are subtracted.
fn unread_after_read(entry: &ConversationSummary, ids: Option<&Value>) -> u64 {
    let Some(listed) = ids.filter(|v| v.is_array()) else {
        return 0;
    };
    let Some(latest) = entry.last_message.as_ref().and_then(|m| string_field(m, "id")) else {
        return 0;
    };
    let names_latest = |id: &Value| match id {
        Value::String(s) => *s == latest,
        Value::Number(n) => n.to_string() == latest,
        _ => false,
    };
    if safe_find(Some(listed), names_latest).is_some() {
        return 0;
    }
    let read = safe_filter(Some(listed), |id| id.is_string() || id.is_number()).len() as u64;
    entry.unread_count.saturating_sub(read)
}
