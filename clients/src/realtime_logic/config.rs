use anyhow::{Context, Result};
use clap::Parser;
use lib_realtime::RealtimeConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Interactive realtime messaging client", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "REALTIME_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "REALTIME_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "REALTIME_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "REALTIME_URL", help = "WebSocket endpoint of the message server.")]
    pub url: Option<String>,

    #[clap(long, env = "REALTIME_TOKEN", help = "Access token used as-is.")]
    pub token: Option<String>,

    #[clap(long, env = "REALTIME_TOKEN_FILE", help = "File holding the access token; re-read on every connection attempt.")]
    pub token_file: Option<PathBuf>,

    #[clap(long, env = "REALTIME_REFRESH_URL", help = "Endpoint exchanging the refresh token for a new access token.")]
    pub refresh_url: Option<String>,

    #[clap(long, env = "REALTIME_REFRESH_TOKEN", help = "Refresh token sent to the refresh endpoint.")]
    pub refresh_token: Option<String>,

    #[clap(long, env = "REALTIME_STORAGE_DIR", help = "Directory for the persisted outbound backlog.")]
    pub storage_dir: Option<PathBuf>,

    #[clap(long, env = "REALTIME_HEARTBEAT_INTERVAL_MS", help = "Milliseconds between heartbeat checks.")]
    pub heartbeat_interval_ms: Option<u64>,

    #[clap(long, env = "REALTIME_RECONNECT_MAX_MS", help = "Upper bound in milliseconds for reconnect delays.")]
    pub reconnect_max_ms: Option<u64>,

    /// Connection tunables from the file's `realtime` object.
    #[clap(skip)]
    #[serde(default)]
    pub realtime: Option<Value>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            url: other.url.or(self.url),
            token: other.token.or(self.token),
            token_file: other.token_file.or(self.token_file),
            refresh_url: other.refresh_url.or(self.refresh_url),
            refresh_token: other.refresh_token.or(self.refresh_token),
            storage_dir: other.storage_dir.or(self.storage_dir),
            heartbeat_interval_ms: other.heartbeat_interval_ms.or(self.heartbeat_interval_ms),
            reconnect_max_ms: other.reconnect_max_ms.or(self.reconnect_max_ms),
            realtime: other.realtime.or(self.realtime),
        }
    }

    fn defaults() -> Config {
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            storage_dir: dirs::data_local_dir().map(|d| d.join("client_realtime")),
            ..Default::default()
        }
    }

    /// Builds the library configuration: defaults, then the file's `realtime`
    /// object, then the flags given on the command line or in the environment.
    pub fn realtime_config(&self) -> Result<RealtimeConfig> {
        let mut config = RealtimeConfig::default();
        if let Some(patch) = &self.realtime {
            config = config.merge(patch).context("invalid 'realtime' section")?;
        }
        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(ms) = self.heartbeat_interval_ms {
            config.heartbeat_interval_ms = ms;
        }
        if let Some(ms) = self.reconnect_max_ms {
            config.reconnect_max_ms = ms;
        }
        config.validate().context("invalid realtime configuration")?;
        Ok(config)
    }
}

fn read_file_config(path: &PathBuf) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    let Ok(raw) = fs::read_to_string(path) else {
        log::warn!("Failed to read config file: {}. Falling back to other sources.", path.display());
        return None;
    };
    match serde_json::from_str::<Config>(&raw) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Resolves the client configuration from defaults, the JSON file and the
/// command line (which includes the environment), in increasing precedence.
pub fn load_config() -> Config {
    load_config_from(Config::parse())
}

fn load_config_from(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("client_realtime.conf"));

    let mut current = Config::defaults();
    if let Some(file_config) = read_file_config(&config_file_path) {
        current = current.merge(file_config);
    }
    current.merge(cli)
}
