//! # Transport
//!
//! Opens the WebSocket with `tokio-tungstenite` and classifies how it ended.
//! The credential travels as a query parameter and is supplied fresh on every
//! call; nothing here retries, that is the connection task's job.

/// Socket connect, URL construction and close-frame classification.
pub mod ws_client;

pub use ws_client::{close_details, connect_socket, is_auth_failure, socket_url, WsStream, AUTH_CLOSE_CODES};
