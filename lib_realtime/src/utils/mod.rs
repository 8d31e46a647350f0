//! # Utilities Module
//!
//! General-purpose helpers shared by the rest of `lib_realtime`.
//!
//! ## Contained Modules:
//!
//! - **`json`**: explicit, shape-checked helpers (`safe_find`, `safe_filter`,
//!   `safe_map`) for walking loosely typed server payloads. They are called at
//!   the use site and treat anything that is not an array as empty.
//! - **`time`**: wall-clock helpers for the wire `timestamp` field.

/// Shape-checked helpers over `serde_json::Value` arrays.
pub mod json;
/// Timestamp helpers.
pub mod time;

pub use json::{safe_filter, safe_find, safe_map, string_field};
pub use time::{current_datetime_rfc9557, now_ms};
