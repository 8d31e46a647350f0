//! # Local Persistence
//!
//! Keeps the outbound backlog (queued plus unacknowledged messages) across
//! restarts. The connection task writes it after every change while
//! persistence is enabled, restores it on start and clears it once the
//! backlog has been fully flushed and acknowledged.

/// The `BacklogStore` trait with file and in-memory implementations.
pub mod backlog;

pub use backlog::{BacklogStore, FileBacklogStore, MemoryBacklogStore, BACKLOG_KEY};
