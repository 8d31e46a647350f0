use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::core::backoff::ReconnectPolicy;
use crate::core::dispatcher::BatchSettings;
use crate::error::{RealtimeError, Result};

/// Tunables of the connection manager. Every field has a default, so a JSON
/// file only needs the keys it wants to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeConfig {
    /// `ws://` or `wss://` endpoint of the message server.
    pub url: String,
    /// Query parameter that carries the access credential.
    pub token_param: String,
    pub handshake_timeout_ms: u64,

    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_floor_ms: u64,
    pub reconnect_jitter: f64,

    pub heartbeat_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub max_missed_pongs: u32,

    pub queue_capacity: usize,
    /// Persist the outbound backlog so a restart does not lose unsent messages.
    pub persist_queue: bool,

    pub ack_timeout_ms: u64,
    pub ack_sweep_interval_ms: u64,
    pub ack_capacity: usize,
    /// Retransmissions before a message is dead-lettered.
    pub max_retransmits: u32,

    pub dedup_window_ms: u64,

    pub presence_capacity: usize,
    pub presence_linger_ms: u64,

    pub batch_size: usize,
    pub batch_max_wait_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            token_param: "token".to_string(),
            handshake_timeout_ms: 12_000,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
            reconnect_floor_ms: 250,
            reconnect_jitter: 0.2,
            heartbeat_interval_ms: 25_000,
            pong_timeout_ms: 10_000,
            max_missed_pongs: 2,
            queue_capacity: 200,
            persist_queue: true,
            ack_timeout_ms: 10_000,
            ack_sweep_interval_ms: 5_000,
            ack_capacity: 500,
            max_retransmits: 5,
            dedup_window_ms: 5_000,
            presence_capacity: 1_000,
            presence_linger_ms: 5_000,
            batch_size: 20,
            batch_max_wait_ms: 50,
        }
    }
}

impl RealtimeConfig {
    /// Reads a camelCase JSON file on top of the defaults and validates it.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: RealtimeConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        log::debug!("Realtime config loaded from {}", path.display());
        Ok(config)
    }

    /// Overrides the fields present in `patch` (a camelCase JSON object).
    pub fn merge(self, patch: &Value) -> Result<Self> {
        let Some(overrides) = patch.as_object() else {
            return Err(RealtimeError::Config("config patch must be a JSON object".into()));
        };
        let mut base = serde_json::to_value(self)?;
        if let Some(fields) = base.as_object_mut() {
            for (key, value) in overrides {
                if !fields.contains_key(key) {
                    log::warn!("Ignoring unknown config key '{}'", key);
                    continue;
                }
                fields.insert(key.clone(), value.clone());
            }
        }
        Ok(serde_json::from_value(base)?)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RealtimeError::Config(format!(
                "url scheme must be ws or wss, got '{}'",
                url.scheme()
            )));
        }
        if self.token_param.is_empty() {
            return Err(RealtimeError::Config("tokenParam must not be empty".into()));
        }
        let positive = [
            ("handshakeTimeoutMs", self.handshake_timeout_ms),
            ("reconnectBaseMs", self.reconnect_base_ms),
            ("heartbeatIntervalMs", self.heartbeat_interval_ms),
            ("pongTimeoutMs", self.pong_timeout_ms),
            ("ackTimeoutMs", self.ack_timeout_ms),
            ("ackSweepIntervalMs", self.ack_sweep_interval_ms),
            ("queueCapacity", self.queue_capacity as u64),
            ("ackCapacity", self.ack_capacity as u64),
            ("presenceCapacity", self.presence_capacity as u64),
            ("batchSize", self.batch_size as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(RealtimeError::Config(format!("{name} must be greater than zero")));
        }
        if self.reconnect_floor_ms > self.reconnect_max_ms || self.reconnect_base_ms > self.reconnect_max_ms {
            return Err(RealtimeError::Config(
                "reconnectMaxMs must not be below reconnectBaseMs or reconnectFloorMs".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect_jitter) {
            return Err(RealtimeError::Config("reconnectJitter must be within 0.0..=1.0".into()));
        }
        if self.max_missed_pongs == 0 {
            return Err(RealtimeError::Config("maxMissedPongs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(self.reconnect_base_ms),
            max: Duration::from_millis(self.reconnect_max_ms),
            floor: Duration::from_millis(self.reconnect_floor_ms),
            jitter: self.reconnect_jitter,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn ack_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.ack_sweep_interval_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn presence_linger(&self) -> Duration {
        Duration::from_millis(self.presence_linger_ms)
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            batch_size: self.batch_size,
            max_wait: Duration::from_millis(self.batch_max_wait_ms),
        }
    }
}
