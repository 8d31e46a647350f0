//! # Configuration Modules
//!
//! Runtime settings of the realtime client. Values come from built-in
//! defaults, optionally overlaid by a camelCase JSON file; the binary adds its
//! own environment and command-line layer on top.

/// Connection manager tunables with defaults, file loading and validation.
pub mod realtime_config;

pub use realtime_config::RealtimeConfig;
