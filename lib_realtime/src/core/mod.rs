//! # Core Engine Module
//!
//! Everything the realtime client does between "the application wants to
//! talk" and "bytes go on the socket". The parts are plain data structures
//! owned by a single connection task, plus the event bus that runs on its own
//! task so consumers never stall the socket.
//!
//! ## Core Components:
//!
//! - **`connection_manager`**: the cloneable public handle, the lifecycle
//!   states and the snapshot/stats types.
//! - **`connection_task`**: the owner task; a `select!` loop over commands,
//!   socket frames, the handshake and every timer.
//! - **`backoff`**: capped exponential reconnect delays with jitter and a floor.
//! - **`heartbeat`**: ping-when-idle bookkeeping and missed-pong verdicts.
//! - **`queue`**: the three-lane outbound backlog with priority eviction.
//! - **`ack_tracker`**: in-flight messages awaiting a correlated ack.
//! - **`dedup`**: time-windowed suppression of redelivered events.
//! - **`dispatcher`**: the event bus with batching and panic isolation.
//! - **`presence`**, **`conversations`**: client-side caches fed by events.
//! - **`registry`**: reference-counted presence interest with a linger.

/// Public handle and lifecycle types.
pub mod connection_manager;
/// The single owner task of the socket.
pub(crate) mod connection_task;
/// Reconnection delay schedule.
pub mod backoff;
/// Liveness monitor.
pub mod heartbeat;
/// Priority backlog of outbound messages.
pub mod queue;
/// Delivery acknowledgment tracking.
pub mod ack_tracker;
/// Inbound duplicate suppression.
pub mod dedup;
/// Event bus.
pub mod dispatcher;
/// Presence cache.
pub mod presence;
/// Conversation and proposal cache.
pub mod conversations;
/// Presence interest registry.
pub mod registry;

pub use ack_tracker::{AckTracker, PendingAck};
pub use backoff::ReconnectPolicy;
pub use connection_manager::{
    ConnectionManager, ConnectionManagerBuilder, ConnectionSnapshot, ConnectionState, ConnectionStats,
};
pub use conversations::{ConversationCache, ConversationSummary, ProposalStatus};
pub use dedup::{event_identity, DedupCache};
pub use dispatcher::{BatchSettings, EventBus, EventCallback, Subscription, WILDCARD};
pub use heartbeat::{HeartbeatMonitor, HeartbeatVerdict};
pub use presence::{PresenceCache, PresenceEntry};
pub use queue::{OutboundMessage, Priority, SmartQueue};
pub use registry::PresenceRegistry;
