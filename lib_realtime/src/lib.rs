//! # lib_realtime
//!
//! A resilient client for a realtime messaging server: one persistent
//! WebSocket with automatic reconnection, adaptive heartbeating, an outbound
//! priority backlog that survives outages and restarts, acknowledgment
//! tracking with retransmission, inbound deduplication and a batching event
//! bus.
//!
//! ```no_run
//! use lib_realtime::{ConnectionManager, RealtimeConfig};
//!
//! # async fn demo() -> lib_realtime::Result<()> {
//! let manager = ConnectionManager::builder(RealtimeConfig::default()).build()?;
//! let _sub = manager.subscribe("message:new", |batch| {
//!     for event in batch {
//!         println!("{:?}", event.data);
//!     }
//! });
//! manager.connect()?;
//! manager.send_chat_message("c1", "hello")?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

/// Runtime configuration.
pub mod configs;
/// Connection manager and its building blocks.
pub mod core;
/// Access credential storage and refresh.
pub mod credentials;
/// Library error type.
pub mod error;
/// Console/file logging setup.
#[cfg(feature = "loggers")]
pub mod loggers;
/// Wire message shapes.
pub mod protocol;
/// Backlog persistence.
pub mod storage;
/// WebSocket connect and close classification.
pub mod transport;
/// JSON and time helpers.
pub mod utils;

pub use crate::configs::RealtimeConfig;
pub use crate::core::{
    ConnectionManager, ConnectionSnapshot, ConnectionState, ConnectionStats, EventBus, OutboundMessage, Priority,
    Subscription,
};
pub use crate::credentials::{CredentialSource, CredentialStore};
pub use crate::error::{RealtimeError, Result};
pub use crate::protocol::{categories, InboundKind, OutboundKind, WireMessage};
pub use crate::storage::{BacklogStore, FileBacklogStore, MemoryBacklogStore};
