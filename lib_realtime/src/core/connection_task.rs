//! # Connection Task
//!
//! The single owner of the socket and of all mutable client state. It sleeps
//! in one `select!` over:
//!
//! - commands from the [`ConnectionManager`](super::connection_manager::ConnectionManager) handles;
//! - inbound frames of the live socket;
//! - the in-flight handshake (credential refresh included);
//! - the reconnect, heartbeat, pong-deadline and ack-sweep timers;
//! - presence lingers that ran out.
//!
//! Each wake-up is handled to completion before the next one is polled, so
//! the queue, the trackers and the caches never see concurrent mutation.

use std::future::pending;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use uuid::Uuid;

use crate::configs::RealtimeConfig;
use crate::core::ack_tracker::AckTracker;
use crate::core::backoff::ReconnectPolicy;
use crate::core::connection_manager::{ConnectionSnapshot, ConnectionState, ConnectionStats};
use crate::core::conversations::{ConversationCache, ConversationSummary};
use crate::core::dedup::{event_identity, DedupCache};
use crate::core::dispatcher::EventBus;
use crate::core::heartbeat::{HeartbeatMonitor, HeartbeatVerdict};
use crate::core::presence::{PresenceCache, PresenceEntry};
use crate::core::queue::{OutboundMessage, Priority, SmartQueue};
use crate::core::registry::PresenceRegistry;
use crate::credentials::CredentialStore;
use crate::error::{RealtimeError, Result};
use crate::protocol::{categories, InboundKind, OutboundKind, WireMessage};
use crate::storage::BacklogStore;
use crate::transport::{close_details, connect_socket, is_auth_failure, WsStream};
use crate::utils::now_ms;

/// Requests from the handle to the task.
pub(crate) enum Command {
    Connect,
    Disconnect,
    Reconnect,
    Destroy,
    Send(OutboundMessage),
    SetOnline(bool),
    SetVisible(bool),
    Focus,
    PresenceInterest {
        user_id: String,
        interested: bool,
    },
    Stats(oneshot::Sender<ConnectionStats>),
    Presence {
        user_id: String,
        reply: oneshot::Sender<Option<PresenceEntry>>,
    },
    Conversation {
        conversation_id: String,
        reply: oneshot::Sender<Option<ConversationSummary>>,
    },
    Conversations(oneshot::Sender<Vec<ConversationSummary>>),
}

/// What woke the task up.
enum Wake {
    Command(Option<Command>),
    Frame(Option<std::result::Result<Message, WsError>>),
    Handshake(Result<WsStream>),
    ReconnectDue,
    HeartbeatDue,
    PongOverdue,
    SweepDue,
    LingerExpired(String),
}

type Handshake = BoxFuture<'static, Result<WsStream>>;

pub(crate) struct ConnectionTask {
    config: RealtimeConfig,
    policy: ReconnectPolicy,
    credentials: Arc<CredentialStore>,
    backlog_store: Option<Arc<dyn BacklogStore>>,
    bus: EventBus,
    state_tx: watch::Sender<ConnectionSnapshot>,

    state: ConnectionState,
    offline: bool,
    visible: bool,
    auto_reconnect: bool,
    attempts: u32,
    reconnect_delay: Option<Duration>,
    last_activity_ms: Option<i64>,
    terminated: bool,

    socket: Option<WsStream>,
    handshake: Option<Handshake>,
    reconnect_at: Option<Instant>,
    next_heartbeat: Option<Instant>,
    next_sweep: Option<Instant>,
    // Refresh the credential before the next attempt.
    refresh_pending: bool,
    // One zero-delay retry per streak of auth failures.
    auth_retry_spent: bool,

    heartbeat: HeartbeatMonitor,
    queue: SmartQueue,
    acks: AckTracker,
    dedup: DedupCache,
    presence: PresenceCache,
    registry: PresenceRegistry,
    linger_rx: mpsc::UnboundedReceiver<String>,
    conversations: ConversationCache,
    backlog_dirty: bool,
    dead_lettered: u64,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
        None => pending::<()>().await,
    }
}

async fn next_frame(socket: &mut Option<WsStream>) -> Option<std::result::Result<Message, WsError>> {
    match socket {
        Some(ws) => ws.next().await,
        None => pending().await,
    }
}

async fn finish_handshake(handshake: &mut Option<Handshake>) -> Result<WsStream> {
    match handshake {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

impl ConnectionTask {
    pub(crate) fn new(
        config: RealtimeConfig,
        credentials: Arc<CredentialStore>,
        backlog_store: Option<Arc<dyn BacklogStore>>,
        bus: EventBus,
        state_tx: watch::Sender<ConnectionSnapshot>,
        offline: bool,
    ) -> Self {
        let now = Instant::now();
        let (linger_tx, linger_rx) = mpsc::unbounded_channel();
        let next_sweep = Some(now + config.ack_sweep_interval());
        Self {
            policy: config.reconnect_policy(),
            heartbeat: HeartbeatMonitor::new(
                config.heartbeat_interval(),
                config.pong_timeout(),
                config.max_missed_pongs,
                now,
            ),
            queue: SmartQueue::new(config.queue_capacity),
            acks: AckTracker::new(config.ack_capacity, config.ack_timeout()),
            dedup: DedupCache::new(config.dedup_window()),
            presence: PresenceCache::new(config.presence_capacity),
            registry: PresenceRegistry::new(config.presence_linger(), linger_tx),
            linger_rx,
            conversations: ConversationCache::new(),
            config,
            credentials,
            backlog_store,
            bus,
            state_tx,
            state: ConnectionState::Disconnected,
            offline,
            visible: true,
            auto_reconnect: false,
            attempts: 0,
            reconnect_delay: None,
            last_activity_ms: None,
            terminated: false,
            socket: None,
            handshake: None,
            reconnect_at: None,
            next_heartbeat: None,
            next_sweep,
            refresh_pending: false,
            auth_retry_spent: false,
            backlog_dirty: false,
            dead_lettered: 0,
        }
    }

    pub(crate) async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        self.restore_backlog();
        self.publish_snapshot();

        loop {
            let pong_deadline = if self.state == ConnectionState::Connected {
                self.heartbeat.pong_deadline()
            } else {
                None
            };

            let wake = tokio::select! {
                cmd = cmd_rx.recv() => Wake::Command(cmd),
                frame = next_frame(&mut self.socket) => Wake::Frame(frame),
                result = finish_handshake(&mut self.handshake) => Wake::Handshake(result),
                _ = sleep_until_opt(self.reconnect_at) => Wake::ReconnectDue,
                _ = sleep_until_opt(self.next_heartbeat) => Wake::HeartbeatDue,
                _ = sleep_until_opt(pong_deadline) => Wake::PongOverdue,
                _ = sleep_until_opt(self.next_sweep) => Wake::SweepDue,
                Some(user) = self.linger_rx.recv() => Wake::LingerExpired(user),
            };

            self.handle(wake).await;
            self.persist_backlog();

            if self.terminated {
                cmd_rx.close();
                self.publish_snapshot();
                break;
            }
            self.publish_snapshot();
        }
        log::info!("Connection task stopped");
    }

    async fn handle(&mut self, wake: Wake) {
        match wake {
            Wake::Command(Some(cmd)) => self.handle_command(cmd).await,
            // Every handle is gone.
            Wake::Command(None) => self.terminate(false).await,
            Wake::Frame(frame) => self.handle_frame(frame).await,
            Wake::Handshake(result) => {
                self.handshake = None;
                self.handle_handshake(result).await;
            }
            Wake::ReconnectDue => {
                self.reconnect_at = None;
                self.reconnect_delay = None;
                if self.state == ConnectionState::Disconnected && self.auto_reconnect && !self.offline {
                    self.begin_connect();
                }
            }
            Wake::HeartbeatDue => self.heartbeat_tick().await,
            Wake::PongOverdue => self.pong_overdue().await,
            Wake::SweepDue => self.sweep_acks().await,
            Wake::LingerExpired(user) => {
                if self.state == ConnectionState::Connected {
                    let msg = OutboundMessage::command(
                        OutboundKind::PresenceUnsubscribe,
                        Some(json!({ "userIds": [user] })),
                    );
                    self.transmit_untracked(&msg).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => {
                self.auto_reconnect = true;
                if self.state != ConnectionState::Disconnected {
                    return;
                }
                if self.offline {
                    log::info!("Offline; connect deferred until the network returns");
                    return;
                }
                self.begin_connect();
            }
            Command::Disconnect => {
                log::info!("Disconnect requested");
                self.auto_reconnect = false;
                self.cancel_connect_timers();
                self.close_socket(CloseCode::Normal, "client disconnect").await;
            }
            Command::Reconnect => {
                log::info!("Forced reconnect requested");
                self.auto_reconnect = true;
                self.cancel_connect_timers();
                self.close_socket(CloseCode::Normal, "client reconnect").await;
                if !self.offline {
                    self.begin_connect();
                }
            }
            Command::Destroy => self.terminate(false).await,
            Command::Send(msg) => {
                self.enqueue(msg);
                self.flush().await;
            }
            Command::SetOnline(online) => self.set_online(online),
            Command::SetVisible(visible) => {
                self.visible = visible;
                self.heartbeat.set_hidden(!visible);
                if visible {
                    self.resume_foreground();
                }
            }
            Command::Focus => self.resume_foreground(),
            Command::PresenceInterest { user_id, interested } => {
                if interested {
                    if self.registry.subscribe(&user_id) && self.state == ConnectionState::Connected {
                        let msg = OutboundMessage::command(
                            OutboundKind::PresenceSubscribe,
                            Some(json!({ "userIds": [user_id] })),
                        );
                        self.transmit_untracked(&msg).await;
                    }
                } else {
                    self.registry.unsubscribe(&user_id);
                }
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::Presence { user_id, reply } => {
                let _ = reply.send(self.presence.get(&user_id));
            }
            Command::Conversation { conversation_id, reply } => {
                let _ = reply.send(self.conversations.get(&conversation_id));
            }
            Command::Conversations(reply) => {
                let _ = reply.send(self.conversations.list());
            }
        }
    }

    // --- Lifecycle ---

    fn begin_connect(&mut self) {
        self.reconnect_at = None;
        self.reconnect_delay = None;
        self.state = ConnectionState::Connecting;

        let refresh = std::mem::take(&mut self.refresh_pending);
        let credentials = Arc::clone(&self.credentials);
        let url = self.config.url.clone();
        let token_param = self.config.token_param.clone();
        let handshake_timeout = self.config.handshake_timeout();

        log::info!("Connecting (attempt {})", self.attempts + 1);
        self.handshake = Some(Box::pin(async move {
            let attempt = async {
                if refresh {
                    if let Err(e) = credentials.refresh().await {
                        log::warn!("Credential refresh failed: {}", e);
                    }
                }
                // Read again on every attempt so rotated credentials are used.
                let token = credentials.current();
                connect_socket(&url, &token_param, token.as_deref(), handshake_timeout).await
            };
            // The refresh shares the handshake window with the upgrade.
            match timeout(handshake_timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(RealtimeError::Timeout(format!(
                    "connection attempt exceeded {}ms",
                    handshake_timeout.as_millis()
                ))),
            }
        }));
    }

    async fn handle_handshake(&mut self, result: Result<WsStream>) {
        match result {
            Ok(stream) => {
                let now = Instant::now();
                self.socket = Some(stream);
                self.state = ConnectionState::Connected;
                self.attempts = 0;
                self.reconnect_delay = None;
                self.heartbeat.reset(now);
                self.next_heartbeat = Some(now + self.heartbeat.interval());
                self.next_sweep = Some(now + self.config.ack_sweep_interval());
                log::info!("Connected to {}", self.config.url);

                self.bus.publish(WireMessage::local(
                    categories::CONNECTION_STATUS,
                    json!({ "connected": true }),
                ));

                let users = self.registry.on_reconnect();
                if !users.is_empty() {
                    let msg = OutboundMessage::command(
                        OutboundKind::PresenceSubscribe,
                        Some(json!({ "userIds": users })),
                    );
                    self.transmit_untracked(&msg).await;
                }
                self.flush().await;
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                log::warn!("Connection attempt failed: {}", e);
                if e.is_auth() {
                    self.on_auth_failure();
                } else {
                    self.schedule_reconnect();
                }
            }
        }
    }

    /// The socket is gone, for whatever reason.
    fn on_socket_lost(&mut self, code: Option<u16>, reason: &str) {
        self.socket = None;
        let was_connected = self.state == ConnectionState::Connected;
        self.state = ConnectionState::Disconnected;
        self.next_heartbeat = None;

        if was_connected {
            log::warn!("Connection lost (code {:?}, reason '{}')", code, reason);
            self.bus.publish(WireMessage::local(
                categories::CONNECTION_STATUS,
                json!({ "connected": false, "code": code, "reason": reason }),
            ));
        }

        if is_auth_failure(code, reason) {
            self.on_auth_failure();
        } else {
            self.schedule_reconnect();
        }
    }

    fn on_auth_failure(&mut self) {
        self.refresh_pending = true;
        if !self.auto_reconnect || self.offline {
            return;
        }
        if self.auth_retry_spent {
            log::warn!("Credential rejected again; falling back to backoff");
            self.schedule_reconnect();
        } else {
            log::info!("Credential rejected; refreshing and reconnecting immediately");
            self.auth_retry_spent = true;
            self.begin_connect();
        }
    }

    fn schedule_reconnect(&mut self) {
        if !self.auto_reconnect || self.offline || self.terminated {
            return;
        }
        self.attempts += 1;
        let delay = self.policy.delay(self.attempts, &mut rand::rng());
        self.reconnect_at = Some(Instant::now() + delay);
        self.reconnect_delay = Some(delay);
        log::info!("Reconnecting in {}ms (attempt {})", delay.as_millis(), self.attempts);
    }

    fn cancel_connect_timers(&mut self) {
        self.handshake = None;
        self.reconnect_at = None;
        self.reconnect_delay = None;
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Closes the live socket, if any, without scheduling a reconnect.
    async fn close_socket(&mut self, code: CloseCode, reason: &str) {
        let Some(mut ws) = self.socket.take() else {
            return;
        };
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        // Best effort; the peer may already be gone.
        let _ = timeout(Duration::from_secs(1), ws.close(Some(frame))).await;

        let was_connected = self.state == ConnectionState::Connected;
        self.state = ConnectionState::Disconnected;
        self.next_heartbeat = None;
        if was_connected {
            self.bus.publish(WireMessage::local(
                categories::CONNECTION_STATUS,
                json!({ "connected": false, "reason": reason }),
            ));
        }
    }

    fn set_online(&mut self, online: bool) {
        if online == !self.offline {
            return;
        }
        self.offline = !online;
        if self.offline {
            log::info!("Network offline; reconnection suspended");
            self.reconnect_at = None;
            self.reconnect_delay = None;
        } else {
            log::info!("Network online");
            if self.auto_reconnect && self.state == ConnectionState::Disconnected {
                self.begin_connect();
            }
        }
    }

    fn resume_foreground(&mut self) {
        self.heartbeat.resync(Instant::now());
        if self.auto_reconnect && !self.offline && self.state == ConnectionState::Disconnected {
            log::info!("Back in the foreground; reconnecting");
            self.begin_connect();
        }
    }

    async fn terminate(&mut self, banned: bool) {
        self.auto_reconnect = false;
        self.cancel_connect_timers();
        let reason = if banned { "user banned" } else { "client destroyed" };
        self.close_socket(CloseCode::Normal, reason).await;

        self.next_sweep = None;
        self.queue.clear();
        self.acks.clear();
        self.dedup.clear();
        self.presence.clear();
        self.conversations.clear();
        self.registry.clear();
        self.backlog_dirty = false;

        if banned {
            if let Some(store) = &self.backlog_store {
                if let Err(e) = store.clear() {
                    log::warn!("Failed to clear backlog store: {}", e);
                }
            }
            if let Err(e) = self.credentials.purge() {
                log::warn!("Failed to purge credential: {}", e);
            }
        }

        self.bus.shutdown();
        self.terminated = true;
        log::info!("Connection manager terminated ({})", reason);
    }

    // --- Inbound ---

    async fn handle_frame(&mut self, frame: Option<std::result::Result<Message, WsError>>) {
        let text = match frame {
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    log::debug!("Ignoring non UTF-8 binary frame");
                    self.touch();
                    return;
                }
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                self.touch();
                return;
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = close_details(frame.as_ref());
                self.on_socket_lost(code, &reason);
                return;
            }
            Some(Err(e)) => {
                log::warn!("Socket error: {}", e);
                self.on_socket_lost(None, "");
                return;
            }
            None => {
                self.on_socket_lost(None, "");
                return;
            }
        };

        self.touch();
        match WireMessage::parse(&text) {
            Ok(msg) => self.route(msg).await,
            Err(e) => log::warn!("Dropping malformed frame: {}", e),
        }
    }

    fn touch(&mut self) {
        self.heartbeat.record_activity(Instant::now());
        self.last_activity_ms = Some(now_ms());
    }

    async fn route(&mut self, msg: WireMessage) {
        let kind = msg.inbound_kind();
        // The server answered, so the credential is good.
        self.auth_retry_spent = false;

        match kind {
            InboundKind::Pong => {
                self.heartbeat.pong_received(Instant::now());
                return;
            }
            InboundKind::Ping => {
                self.transmit_wire(&WireMessage::new("pong", None)).await;
                return;
            }
            InboundKind::UserBanned => {
                log::warn!("Account banned by the server");
                self.bus.publish(msg);
                self.terminate(true).await;
                return;
            }
            _ => {}
        }

        if let Some(cid) = msg.echoed_correlation_id() {
            if self.acks.acknowledge(&cid).is_some() {
                log::debug!("'{}' acknowledged ({})", msg.kind, cid);
                self.backlog_dirty = true;
            }
        }

        if let Some(identity) = event_identity(&msg) {
            if !self.dedup.first_seen(&identity, Instant::now()) {
                log::debug!("Duplicate '{}' dropped", msg.kind);
                return;
            }
        }

        if kind.is_presence() {
            self.presence.apply(&msg);
        }
        self.conversations.apply(&msg);

        if kind == InboundKind::MessageNew {
            self.confirm_delivery(&msg).await;
        }
        if kind == InboundKind::Error {
            log::warn!("Server error: {}", msg.error.as_deref().unwrap_or("unspecified"));
        }

        self.bus.publish(msg);
    }

    async fn confirm_delivery(&mut self, msg: &WireMessage) {
        let Some(message_id) = msg.data_str("id").or_else(|| msg.data_str("messageId")) else {
            return;
        };
        let mut data = json!({ "messageId": message_id });
        if let Some(conversation_id) = msg.data_str("conversationId") {
            data["conversationId"] = Value::String(conversation_id);
        }
        self.enqueue(OutboundMessage::command(OutboundKind::MessageDeliveryAck, Some(data)));
        self.flush().await;
    }

    // --- Outbound ---

    fn enqueue(&mut self, mut msg: OutboundMessage) {
        // Correlation ids are assigned fresh at transmission.
        msg.correlation_id = None;
        for dropped in self.queue.enqueue(msg) {
            log::warn!("Discarded queued '{}' under capacity pressure", dropped.kind);
        }
        self.backlog_dirty = true;
    }

    /// Drains the queue onto the socket in priority order.
    async fn flush(&mut self) {
        while self.state == ConnectionState::Connected {
            let Some(mut msg) = self.queue.dequeue() else {
                break;
            };
            self.backlog_dirty = true;

            let tracked = msg.expects_ack();
            if tracked {
                msg.correlation_id = Some(Uuid::new_v4().to_string());
            }

            if let Err(e) = self.send_frame(&msg.to_wire()).await {
                log::warn!("Send of '{}' failed, keeping it queued: {}", msg.kind, e);
                msg.correlation_id = None;
                self.queue.requeue_front(msg);
                self.on_socket_lost(None, "");
                break;
            }

            if tracked {
                if let Some(evicted) = self.acks.track(msg, Instant::now()) {
                    log::warn!("Gave up waiting for ack of '{}'", evicted.kind);
                }
            }
        }
    }

    /// Sends a command that is neither queued nor tracked (presence, pongs).
    async fn transmit_untracked(&mut self, msg: &OutboundMessage) {
        self.transmit_wire(&msg.to_wire()).await;
    }

    async fn transmit_wire(&mut self, wire: &WireMessage) {
        if let Err(e) = self.send_frame(wire).await {
            log::warn!("Send of '{}' failed: {}", wire.kind, e);
            self.on_socket_lost(None, "");
        }
    }

    async fn send_frame(&mut self, wire: &WireMessage) -> Result<()> {
        let text = wire.to_text()?;
        let ws = self.socket.as_mut().ok_or(RealtimeError::Closed)?;
        ws.send(Message::Text(text.into()))
            .await
            .map_err(|e| RealtimeError::WebSocket(e.to_string()))
    }

    // --- Timers ---

    async fn heartbeat_tick(&mut self) {
        let now = Instant::now();
        self.next_heartbeat = Some(now + self.heartbeat.interval());
        if self.state != ConnectionState::Connected || !self.heartbeat.should_ping(now) {
            return;
        }
        log::trace!("Idle connection; sending ping");
        self.heartbeat.ping_sent(now);
        self.transmit_wire(&WireMessage::new(OutboundKind::Ping.as_str(), None)).await;
    }

    async fn pong_overdue(&mut self) {
        match self.heartbeat.pong_missed() {
            HeartbeatVerdict::Degraded(n) => log::warn!("Missed pong #{}", n),
            HeartbeatVerdict::Dead => {
                log::warn!("Heartbeat lost; closing the socket");
                if let Some(mut ws) = self.socket.take() {
                    let _ = timeout(Duration::from_millis(500), ws.close(None)).await;
                }
                self.on_socket_lost(None, "heartbeat timeout");
            }
        }
    }

    async fn sweep_acks(&mut self) {
        let now = Instant::now();
        self.next_sweep = Some(now + self.config.ack_sweep_interval());

        let expired = self.acks.sweep(now);
        if expired.is_empty() {
            return;
        }
        self.backlog_dirty = true;
        for mut msg in expired {
            msg.retransmits += 1;
            if msg.retransmits > self.config.max_retransmits {
                log::warn!("'{}' dead-lettered after {} retransmits", msg.kind, self.config.max_retransmits);
                self.dead_lettered += 1;
                let payload = serde_json::to_value(&msg).unwrap_or(Value::Null);
                self.bus.publish(WireMessage::local(categories::DEAD_LETTER, payload));
                continue;
            }
            log::info!("No ack for '{}'; retransmitting (#{})", msg.kind, msg.retransmits);
            msg.priority = Priority::High;
            self.enqueue(msg);
        }
        self.flush().await;
    }

    // --- Persistence & reporting ---

    fn restore_backlog(&mut self) {
        if !self.config.persist_queue {
            return;
        }
        let Some(store) = &self.backlog_store else {
            return;
        };
        match store.load() {
            Ok(messages) if !messages.is_empty() => {
                log::info!("Restored {} unsent message(s)", messages.len());
                let messages = messages
                    .into_iter()
                    .map(|mut m| {
                        m.correlation_id = None;
                        m
                    })
                    .collect();
                self.queue.restore(messages);
                self.backlog_dirty = true;
            }
            Ok(_) => {}
            Err(e) => log::warn!("Could not load backlog: {}", e),
        }
    }

    fn persist_backlog(&mut self) {
        if !std::mem::take(&mut self.backlog_dirty) || !self.config.persist_queue {
            return;
        }
        let Some(store) = &self.backlog_store else {
            return;
        };
        let mut backlog = self.queue.snapshot();
        backlog.extend(self.acks.messages());
        let result = if backlog.is_empty() {
            store.clear()
        } else {
            store.save(&backlog)
        };
        if let Err(e) = result {
            log::warn!("Failed to persist backlog: {}", e);
        }
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            queued: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            pending_acks: self.acks.len(),
            presence_entries: self.presence.len(),
            conversations: self.conversations.len(),
            dedup_entries: self.dedup.len(),
            dead_lettered: self.dead_lettered,
        }
    }

    fn publish_snapshot(&self) {
        let next = ConnectionSnapshot {
            state: self.state,
            offline: self.offline,
            visible: self.visible,
            auto_reconnect: self.auto_reconnect,
            reconnect_attempts: self.attempts,
            reconnect_delay: self.reconnect_delay,
            last_activity_ms: self.last_activity_ms,
            terminated: self.terminated,
        };
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
