//! # Wire Protocol
//!
//! JSON shapes exchanged with the message server. Every frame is an envelope
//! of the form `{ type, data?, error?, timestamp, correlationId? }`; the `type`
//! tag selects the meaning of `data`.
//!
//! - **`wire`**: the envelope itself plus parsing/serialization.
//! - **`kinds`**: the recognised inbound event types, the outbound command set,
//!   and the local-only categories the client publishes on its event bus.

/// The JSON envelope.
pub mod wire;
/// Inbound event kinds and outbound commands.
pub mod kinds;

pub use kinds::{categories, InboundKind, OutboundKind};
pub use wire::WireMessage;
