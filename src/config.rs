use std::time::Duration;

use tracing::trace;

use crate::actors::MonitorSettings;
use crate::alerting::Thresholds;
use crate::channel::ChannelOptions;
use crate::history::HistoryConfig;

/// One named channel towards a telemetry endpoint
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    pub url: String,

    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    #[serde(default = "default_true")]
    pub heartbeat: bool,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl ChannelConfig {
    pub fn options(&self) -> ChannelOptions {
        ChannelOptions {
            url: self.url.clone(),
            auto_reconnect: self.auto_reconnect,
            heartbeat: self.heartbeat,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitorConfig {
    /// Seconds between monitoring ticks
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Seconds between alert retention sweeps
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,

    /// Hours an alert record is retained
    #[serde(default = "default_alert_retention_hours")]
    pub alert_retention_hours: i64,

    /// Seconds of silence before an entity counts as timed out
    #[serde(default = "default_inactivity_threshold_secs")]
    pub inactivity_threshold_secs: i64,

    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            sweep_secs: default_sweep_secs(),
            alert_retention_hours: default_alert_retention_hours(),
            inactivity_threshold_secs: default_inactivity_threshold_secs(),
            command_queue_capacity: default_command_queue_capacity(),
        }
    }
}

/// Upstream persistence/query API
#[derive(Debug, Clone, serde::Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub channels: Vec<ChannelConfig>,
    pub monitor: Option<MonitorConfig>,
    pub thresholds: Option<Thresholds>,
    pub history: Option<HistoryConfig>,
    pub upstream: Option<UpstreamConfig>,
}

impl Config {
    pub fn monitor_settings(&self) -> MonitorSettings {
        let monitor = self.monitor.clone().unwrap_or_default();
        MonitorSettings {
            tick_interval: Duration::from_secs(monitor.tick_secs),
            sweep_interval: Duration::from_secs(monitor.sweep_secs),
            alert_retention: chrono::Duration::hours(monitor.alert_retention_hours),
            inactivity_threshold: chrono::Duration::seconds(monitor.inactivity_threshold_secs),
            command_queue_capacity: monitor.command_queue_capacity,
            thresholds: self.thresholds.unwrap_or_default(),
            history: self.history.unwrap_or_default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_base_backoff_ms() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_tick_secs() -> u64 {
    30
}

fn default_sweep_secs() -> u64 {
    3600
}

fn default_alert_retention_hours() -> i64 {
    24
}

fn default_inactivity_threshold_secs() -> i64 {
    300
}

fn default_command_queue_capacity() -> usize {
    256
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
