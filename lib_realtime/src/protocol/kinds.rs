use std::fmt;

use crate::core::queue::Priority;

/// Event bus category names that are not plain server `type` tags.
pub mod categories {
    /// Published with `{"connected": bool}` on every connect/disconnect.
    pub const CONNECTION_STATUS: &str = "connection:status";
    /// Published when a message exhausted its retransmissions.
    pub const DEAD_LETTER: &str = "message:dead_letter";
    /// Server `{type:"error"}` payloads.
    pub const ERROR: &str = "error";
    /// Terminal account ban.
    pub const USER_BANNED: &str = "user:banned";

    /// Every server type the client recognises, useful for wildcard consumers.
    pub const INBOUND: &[&str] = &[
        "message:new",
        "message:sent",
        "message:read",
        "message:delivered",
        "message:delivery_ack",
        "conversation:updated",
        "conversations:update",
        "conversations:list",
        "conversations:polling_started",
        "conversations:polling_stopped",
        "conversations:polling_error",
        "proposal:received",
        "proposal:accepted",
        "proposal:rejected",
        "proposal:expired",
        "delivery_confirmed",
        "service:cancelled",
        "marketplace:status_changed",
        "presence:online",
        "presence:offline",
        "presence:snapshot",
        "error",
        "user:banned",
    ];
}

/// Server-to-client event types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InboundKind {
    MessageNew,
    MessageSent,
    MessageRead,
    MessageDelivered,
    MessageDeliveryAck,
    ConversationUpdated,
    ConversationsUpdate,
    ConversationsList,
    ConversationsPollingStarted,
    ConversationsPollingStopped,
    ConversationsPollingError,
    ProposalReceived,
    ProposalAccepted,
    ProposalRejected,
    ProposalExpired,
    DeliveryConfirmed,
    ServiceCancelled,
    MarketplaceStatusChanged,
    PresenceOnline,
    PresenceOffline,
    PresenceSnapshot,
    Ping,
    Pong,
    Error,
    UserBanned,
    /// Anything else; still published under its raw tag.
    Other(String),
}

impl From<&str> for InboundKind {
    fn from(tag: &str) -> Self {
        match tag {
            "message:new" => InboundKind::MessageNew,
            "message:sent" => InboundKind::MessageSent,
            "message:read" => InboundKind::MessageRead,
            "message:delivered" => InboundKind::MessageDelivered,
            "message:delivery_ack" => InboundKind::MessageDeliveryAck,
            "conversation:updated" => InboundKind::ConversationUpdated,
            "conversations:update" => InboundKind::ConversationsUpdate,
            "conversations:list" => InboundKind::ConversationsList,
            "conversations:polling_started" => InboundKind::ConversationsPollingStarted,
            "conversations:polling_stopped" => InboundKind::ConversationsPollingStopped,
            "conversations:polling_error" => InboundKind::ConversationsPollingError,
            "proposal:received" => InboundKind::ProposalReceived,
            "proposal:accepted" => InboundKind::ProposalAccepted,
            "proposal:rejected" => InboundKind::ProposalRejected,
            "proposal:expired" => InboundKind::ProposalExpired,
            "delivery_confirmed" => InboundKind::DeliveryConfirmed,
            "service:cancelled" => InboundKind::ServiceCancelled,
            "marketplace:status_changed" => InboundKind::MarketplaceStatusChanged,
            "presence:online" => InboundKind::PresenceOnline,
            "presence:offline" => InboundKind::PresenceOffline,
            "presence:snapshot" => InboundKind::PresenceSnapshot,
            "ping" => InboundKind::Ping,
            "pong" => InboundKind::Pong,
            "error" => InboundKind::Error,
            "user:banned" => InboundKind::UserBanned,
            other => InboundKind::Other(other.to_string()),
        }
    }
}

impl InboundKind {
    /// Heartbeat frames are consumed by the connection task and never published.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, InboundKind::Ping | InboundKind::Pong)
    }

    /// Proposal lifecycle events.
    pub fn is_proposal(&self) -> bool {
        matches!(
            self,
            InboundKind::ProposalReceived
                | InboundKind::ProposalAccepted
                | InboundKind::ProposalRejected
                | InboundKind::ProposalExpired
        )
    }

    /// Events that carry the current state of a user or a conversation.
    /// Applying one twice is harmless and a later one supersedes the earlier.
    pub fn carries_state(&self) -> bool {
        self.is_presence()
            || matches!(
                self,
                InboundKind::ConversationUpdated | InboundKind::ConversationsUpdate | InboundKind::ConversationsList
            )
    }

    /// Presence events feed the presence cache.
    pub fn is_presence(&self) -> bool {
        matches!(
            self,
            InboundKind::PresenceOnline | InboundKind::PresenceOffline | InboundKind::PresenceSnapshot
        )
    }
}

/// Client-to-server commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundKind {
    MessageSend,
    MessageTyping,
    MessageRead,
    MessageDeliveryAck,
    ConversationOpen,
    ConversationClose,
    ConversationList,
    ConversationsStartPolling,
    ConversationsStopPolling,
    ConversationsGetList,
    PresenceSubscribe,
    PresenceUnsubscribe,
    PresenceQuery,
    Ping,
}

impl OutboundKind {
    /// The wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundKind::MessageSend => "message:send",
            OutboundKind::MessageTyping => "message:typing",
            OutboundKind::MessageRead => "message:read",
            OutboundKind::MessageDeliveryAck => "message:delivery_ack",
            OutboundKind::ConversationOpen => "conversation:open",
            OutboundKind::ConversationClose => "conversation:close",
            OutboundKind::ConversationList => "conversation:list",
            OutboundKind::ConversationsStartPolling => "conversations:start_polling",
            OutboundKind::ConversationsStopPolling => "conversations:stop_polling",
            OutboundKind::ConversationsGetList => "conversations:get_list",
            OutboundKind::PresenceSubscribe => "presence:subscribe",
            OutboundKind::PresenceUnsubscribe => "presence:unsubscribe",
            OutboundKind::PresenceQuery => "presence:query",
            OutboundKind::Ping => "ping",
        }
    }

    /// Looks up a command by its wire tag.
    pub fn parse(tag: &str) -> Option<Self> {
        const ALL: [OutboundKind; 14] = [
            OutboundKind::MessageSend,
            OutboundKind::MessageTyping,
            OutboundKind::MessageRead,
            OutboundKind::MessageDeliveryAck,
            OutboundKind::ConversationOpen,
            OutboundKind::ConversationClose,
            OutboundKind::ConversationList,
            OutboundKind::ConversationsStartPolling,
            OutboundKind::ConversationsStopPolling,
            OutboundKind::ConversationsGetList,
            OutboundKind::PresenceSubscribe,
            OutboundKind::PresenceUnsubscribe,
            OutboundKind::PresenceQuery,
            OutboundKind::Ping,
        ];
        ALL.into_iter().find(|k| k.as_str() == tag)
    }

    /// Whether the server confirms this command with a correlated ack.
    pub fn expects_ack(&self) -> bool {
        matches!(self, OutboundKind::MessageSend | OutboundKind::MessageRead)
    }

    /// The lane a command is queued in when the caller does not choose one.
    pub fn default_priority(&self) -> Priority {
        match self {
            OutboundKind::MessageDeliveryAck => Priority::High,
            OutboundKind::MessageTyping
            | OutboundKind::PresenceSubscribe
            | OutboundKind::PresenceUnsubscribe
            | OutboundKind::PresenceQuery
            | OutboundKind::Ping => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

impl fmt::Display for OutboundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
