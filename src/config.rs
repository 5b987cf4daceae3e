use serde::Deserialize;
use std::time::Duration;

use crate::logs::LogTailConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    pub polling: PollingConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Engine address (`unix:///var/run/docker.sock`, `tcp://host:2375`); local default when unset.
    #[serde(default)]
    pub socket: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket: None,
            request_timeout_ms: default_request_timeout_ms(),
            action_timeout_ms: default_action_timeout_ms(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_action_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    pub interval_ms: u64,
    /// Delay before the corrective refresh that follows a dispatched action.
    #[serde(default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,
    #[serde(default = "default_collect_stats")]
    pub collect_stats: bool,
    /// Max number of inventory events kept for /ws/events (slow clients may lag).
    pub broadcast_capacity: usize,
}

fn default_refresh_delay_ms() -> u64 {
    500
}

fn default_collect_stats() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_log_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_history_lines")]
    pub history_lines: usize,
    #[serde(default = "default_log_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_log_poll_interval_ms(),
            history_lines: default_history_lines(),
            channel_capacity: default_log_channel_capacity(),
        }
    }
}

fn default_log_poll_interval_ms() -> u64 {
    1_000
}

fn default_history_lines() -> usize {
    200
}

fn default_log_channel_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often to log app stats (event subscribers, inventory counts, failed refreshes) at INFO level.
    pub stats_log_interval_secs: u64,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.request_timeout_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.action_timeout_ms)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.polling.refresh_delay_ms)
    }

    pub fn log_tail_config(&self) -> LogTailConfig {
        LogTailConfig {
            poll_interval: Duration::from_millis(self.logs.poll_interval_ms),
            history_lines: self.logs.history_lines,
            channel_capacity: self.logs.channel_capacity,
            request_timeout: self.request_timeout(),
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(!self.server.host.is_empty(), "server.host must be non-empty");
        if let Some(socket) = &self.engine.socket {
            anyhow::ensure!(
                ["unix://", "tcp://", "http://"]
                    .iter()
                    .any(|scheme| socket.starts_with(scheme)),
                "engine.socket must start with unix://, tcp:// or http://, got {:?}",
                socket
            );
        }
        anyhow::ensure!(
            self.engine.request_timeout_ms > 0,
            "engine.request_timeout_ms must be > 0, got {}",
            self.engine.request_timeout_ms
        );
        anyhow::ensure!(
            self.engine.action_timeout_ms > 0,
            "engine.action_timeout_ms must be > 0, got {}",
            self.engine.action_timeout_ms
        );
        anyhow::ensure!(
            self.polling.interval_ms > 0,
            "polling.interval_ms must be > 0, got {}",
            self.polling.interval_ms
        );
        anyhow::ensure!(
            self.polling.broadcast_capacity > 0,
            "polling.broadcast_capacity must be > 0, got {}",
            self.polling.broadcast_capacity
        );
        anyhow::ensure!(
            self.logs.poll_interval_ms > 0,
            "logs.poll_interval_ms must be > 0, got {}",
            self.logs.poll_interval_ms
        );
        anyhow::ensure!(
            self.logs.history_lines > 0,
            "logs.history_lines must be > 0, got {}",
            self.logs.history_lines
        );
        anyhow::ensure!(
            self.logs.channel_capacity > 0,
            "logs.channel_capacity must be > 0, got {}",
            self.logs.channel_capacity
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        Ok(())
    }
}
