//! # Connection Manager
//!
//! The public handle of the realtime client. Every method posts a command to
//! a single owner task (see `connection_task`) and returns without waiting
//! for network I/O; the socket, the queues and the caches are only ever
//! touched by that task.
//!
//! Lifecycle: `Disconnected → Connecting → Connected → Disconnected`, with
//! an orthogonal `offline` flag that suppresses reconnection. Observers read
//! the current [`ConnectionSnapshot`] or watch it for changes, and receive
//! `connection:status` events on the bus.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};

use crate::configs::RealtimeConfig;
use crate::core::connection_task::{Command, ConnectionTask};
use crate::core::conversations::ConversationSummary;
use crate::core::dispatcher::{EventBus, Subscription};
use crate::core::presence::PresenceEntry;
use crate::core::queue::{OutboundMessage, Priority};
use crate::credentials::{CredentialSource, CredentialStore};
use crate::error::{RealtimeError, Result};
use crate::protocol::{OutboundKind, WireMessage};
use crate::storage::BacklogStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Point-in-time view of the connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    /// Network reported as unavailable; no reconnects are attempted.
    pub offline: bool,
    pub visible: bool,
    /// Cleared by `disconnect()`, set by `connect()`/`reconnect()`.
    pub auto_reconnect: bool,
    pub reconnect_attempts: u32,
    /// Delay of the pending reconnect, if one is scheduled.
    pub reconnect_delay: Option<Duration>,
    /// Unix milliseconds of the last inbound frame.
    pub last_activity_ms: Option<i64>,
    /// Destroyed or banned; the handle no longer accepts commands.
    pub terminated: bool,
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            offline: false,
            visible: true,
            auto_reconnect: false,
            reconnect_attempts: 0,
            reconnect_delay: None,
            last_activity_ms: None,
            terminated: false,
        }
    }
}

/// Sizes of the internal queues and caches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub queued: usize,
    pub queue_capacity: usize,
    pub pending_acks: usize,
    pub presence_entries: usize,
    pub conversations: usize,
    pub dedup_entries: usize,
    pub dead_lettered: u64,
}

/// Cloneable handle; the task stops when `destroy()` is called or the last
/// clone is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionSnapshot>,
    bus: EventBus,
}

pub struct ConnectionManagerBuilder {
    config: RealtimeConfig,
    credentials: Option<Arc<CredentialStore>>,
    backlog: Option<Arc<dyn BacklogStore>>,
    bus: Option<EventBus>,
    offline: bool,
}

impl ConnectionManagerBuilder {
    pub fn credentials(mut self, credentials: Arc<CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Enables backlog persistence (when `persistQueue` is set).
    pub fn backlog_store(mut self, store: Arc<dyn BacklogStore>) -> Self {
        self.backlog = Some(store);
        self
    }

    /// Uses an existing bus instead of creating one.
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Starts with the network flagged unavailable.
    pub fn start_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Validates the configuration and spawns the owner task. Must run inside
    /// a tokio runtime. The manager stays disconnected until `connect()`.
    pub fn build(self) -> Result<ConnectionManager> {
        self.config.validate()?;
        let bus = self
            .bus
            .unwrap_or_else(|| EventBus::new(self.config.batch_settings()));
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(CredentialStore::new(CredentialSource::None)));

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let initial = ConnectionSnapshot {
            offline: self.offline,
            ..ConnectionSnapshot::default()
        };
        let (state_tx, state_rx) = watch::channel(initial);

        let task = ConnectionTask::new(
            self.config,
            credentials,
            self.backlog,
            bus.clone(),
            state_tx,
            self.offline,
        );
        tokio::spawn(task.run(cmd_rx));

        Ok(ConnectionManager { cmd_tx, state_rx, bus })
    }
}

impl ConnectionManager {
    pub fn builder(config: RealtimeConfig) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            config,
            credentials: None,
            backlog: None,
            bus: None,
            offline: false,
        }
    }

    fn post(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| RealtimeError::Closed)
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.post(make(tx))?;
        rx.await.map_err(|_| RealtimeError::Closed)
    }

    // --- Lifecycle ---

    pub fn connect(&self) -> Result<()> {
        self.post(Command::Connect)
    }

    /// Closes the socket and stops automatic reconnection until the next
    /// `connect()` or `reconnect()`.
    pub fn disconnect(&self) -> Result<()> {
        self.post(Command::Disconnect)
    }

    /// Drops the current socket, if any, and reconnects with zero delay.
    pub fn reconnect(&self) -> Result<()> {
        self.post(Command::Reconnect)
    }

    /// Terminal: closes the socket, clears every queue and cache and stops the
    /// event bus. The persisted backlog is kept for the next run.
    pub fn destroy(&self) -> Result<()> {
        self.post(Command::Destroy)
    }

    /// Resolves once the owner task has terminated.
    pub async fn closed(&self) {
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|s| s.terminated).await;
    }

    // --- Environment signals ---

    pub fn set_online(&self, online: bool) -> Result<()> {
        self.post(Command::SetOnline(online))
    }

    pub fn set_visible(&self, visible: bool) -> Result<()> {
        self.post(Command::SetVisible(visible))
    }

    pub fn focus(&self) -> Result<()> {
        self.post(Command::Focus)
    }

    // --- State ---

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().state == ConnectionState::Connected
    }

    pub async fn stats(&self) -> Result<ConnectionStats> {
        self.ask(Command::Stats).await
    }

    pub async fn presence(&self, user_id: &str) -> Result<Option<PresenceEntry>> {
        let user_id = user_id.to_string();
        self.ask(|reply| Command::Presence { user_id, reply }).await
    }

    pub async fn conversation(&self, conversation_id: &str) -> Result<Option<ConversationSummary>> {
        let conversation_id = conversation_id.to_string();
        self.ask(|reply| Command::Conversation { conversation_id, reply }).await
    }

    /// All cached conversations, most recently updated first.
    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.ask(Command::Conversations).await
    }

    // --- Events ---

    pub fn subscribe<F>(&self, category: &str, callback: F) -> Subscription
    where
        F: Fn(&[WireMessage]) + Send + Sync + 'static,
    {
        self.bus.subscribe(category, callback)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    // --- Outbound ---

    /// Transmits now when connected, otherwise queues (and persists) it.
    pub fn send(&self, kind: &str, data: Option<Value>, priority: Priority) -> Result<()> {
        self.send_message(OutboundMessage::new(kind, data, priority))
    }

    pub fn send_message(&self, message: OutboundMessage) -> Result<()> {
        self.post(Command::Send(message))
    }

    fn send_command(&self, kind: OutboundKind, data: Option<Value>) -> Result<()> {
        self.send_message(OutboundMessage::command(kind, data))
    }

    pub fn send_chat_message(&self, conversation_id: &str, content: &str) -> Result<()> {
        self.send_command(
            OutboundKind::MessageSend,
            Some(json!({ "conversationId": conversation_id, "content": content })),
        )
    }

    pub fn send_typing(&self, conversation_id: &str, is_typing: bool) -> Result<()> {
        self.send_command(
            OutboundKind::MessageTyping,
            Some(json!({ "conversationId": conversation_id, "isTyping": is_typing })),
        )
    }

    /// Marks a conversation read, optionally limited to specific messages.
    pub fn mark_read(&self, conversation_id: &str, message_ids: &[String]) -> Result<()> {
        let mut data = json!({ "conversationId": conversation_id });
        if !message_ids.is_empty() {
            data["messageIds"] = json!(message_ids);
        }
        self.send_command(OutboundKind::MessageRead, Some(data))
    }

    pub fn open_conversation(&self, conversation_id: &str) -> Result<()> {
        self.send_command(
            OutboundKind::ConversationOpen,
            Some(json!({ "conversationId": conversation_id })),
        )
    }

    pub fn close_conversation(&self, conversation_id: &str) -> Result<()> {
        self.send_command(
            OutboundKind::ConversationClose,
            Some(json!({ "conversationId": conversation_id })),
        )
    }

    pub fn list_conversations(&self) -> Result<()> {
        self.send_command(OutboundKind::ConversationList, None)
    }

    /// Asks the server for a fresh conversation list (`conversations:get_list`).
    pub fn refresh_conversations(&self) -> Result<()> {
        self.send_command(OutboundKind::ConversationsGetList, None)
    }

    pub fn start_conversation_polling(&self, interval: Option<Duration>) -> Result<()> {
        let data = interval.map(|i| json!({ "intervalMs": i.as_millis() as u64 }));
        self.send_command(OutboundKind::ConversationsStartPolling, data)
    }

    pub fn stop_conversation_polling(&self) -> Result<()> {
        self.send_command(OutboundKind::ConversationsStopPolling, None)
    }

    pub fn query_presence(&self, user_ids: &[String]) -> Result<()> {
        self.send_command(OutboundKind::PresenceQuery, Some(json!({ "userIds": user_ids })))
    }

    /// Adds one interest in `user_id`'s presence. The server subscription is
    /// shared and reference counted.
    pub fn subscribe_presence(&self, user_id: &str) -> Result<()> {
        self.post(Command::PresenceInterest {
            user_id: user_id.to_string(),
            interested: true,
        })
    }

    /// Releases one interest; the server is told after the linger window.
    pub fn unsubscribe_presence(&self, user_id: &str) -> Result<()> {
        self.post(Command::PresenceInterest {
            user_id: user_id.to_string(),
            interested: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBacklogStore;

    fn config() -> RealtimeConfig {
        RealtimeConfig {
            // Nothing listens here; the tests below never connect.
            url: "ws://127.0.0.1:9/ws".into(),
            ..RealtimeConfig::default()
        }
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_spawning() {
        let bad = RealtimeConfig {
            url: "https://nope".into(),
            ..RealtimeConfig::default()
        };
        assert!(ConnectionManager::builder(bad).build().is_err());
    }

    #[tokio::test]
    async fn sends_while_disconnected_are_queued_and_persisted() {
        let store = Arc::new(MemoryBacklogStore::new());
        let manager = ConnectionManager::builder(config())
            .backlog_store(store.clone())
            .build()
            .unwrap();

        manager.send_chat_message("c1", "hi").unwrap();
        manager.send_typing("c1", true).unwrap();

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.pending_acks, 0);
        assert_eq!(store.load().unwrap().len(), 2);
        assert_eq!(manager.snapshot().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn backlog_is_restored_on_start() {
        let store = Arc::new(MemoryBacklogStore::new());
        store
            .save(&[OutboundMessage::command(OutboundKind::MessageSend, Some(json!({"content": "x"})))])
            .unwrap();

        let manager = ConnectionManager::builder(config())
            .backlog_store(store)
            .build()
            .unwrap();
        assert_eq!(manager.stats().await.unwrap().queued, 1);
    }

    #[tokio::test]
    async fn offline_connect_is_deferred() {
        let manager = ConnectionManager::builder(config()).start_offline(true).build().unwrap();
        manager.connect().unwrap();
        manager.stats().await.unwrap();

        let snap = manager.snapshot();
        assert_eq!(snap.state, ConnectionState::Disconnected);
        assert!(snap.offline);
        assert!(snap.auto_reconnect);
    }

    #[tokio::test]
    async fn destroy_is_terminal() {
        let manager = ConnectionManager::builder(config()).build().unwrap();
        manager.send_chat_message("c1", "hi").unwrap();
        manager.destroy().unwrap();
        manager.closed().await;

        assert!(manager.snapshot().terminated);
        assert!(matches!(manager.connect(), Err(RealtimeError::Closed)));
        assert!(matches!(manager.stats().await, Err(RealtimeError::Closed)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.event_bus().is_stopped());
        assert!(!manager.event_bus().publish(WireMessage::new("x", None)));
    }
}
