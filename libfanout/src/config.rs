//! Configuration management for Fanout

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Visibility window: how long a dequeued job stays invisible before an
    /// unacked lease expires and the job becomes eligible again.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// How long an idle worker sleeps before polling the queue again.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout_secs(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_retry_max_secs")]
    pub max_delay_secs: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_retry_base_ms(),
            max_delay_secs: default_retry_max_secs(),
            max_attempts: default_retry_max_attempts(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_secs(self.max_delay_secs),
            self.max_attempts,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Upper bound on a single adapter call. Overruns count as transient.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Delay between a successful publish and the first analytics fetch.
    #[serde(default = "default_analytics_delay_secs")]
    pub analytics_delay_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            analytics_delay_secs: default_analytics_delay_secs(),
        }
    }
}

impl PublishConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn analytics_delay(&self) -> Duration {
        Duration::from_secs(self.analytics_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Base polling interval right after publish.
    #[serde(default = "default_analytics_poll_secs")]
    pub poll_interval_secs: u64,

    /// Ceiling the widening interval never exceeds.
    #[serde(default = "default_analytics_max_poll_secs")]
    pub max_poll_interval_secs: u64,

    /// The interval doubles every time the post ages by this step.
    #[serde(default = "default_analytics_widen_step_secs")]
    pub widen_age_step_secs: u64,

    /// Polling stops once the post is older than this.
    #[serde(default = "default_analytics_horizon_secs")]
    pub horizon_secs: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_analytics_poll_secs(),
            max_poll_interval_secs: default_analytics_max_poll_secs(),
            widen_age_step_secs: default_analytics_widen_step_secs(),
            horizon_secs: default_analytics_horizon_secs(),
        }
    }
}

impl AnalyticsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_secs(self.max_poll_interval_secs)
    }

    pub fn widen_age_step(&self) -> Duration {
        Duration::from_secs(self.widen_age_step_secs)
    }

    pub fn horizon(&self) -> Duration {
        Duration::from_secs(self.horizon_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Publish pool size. Defaults to the core count.
    #[serde(default = "default_publish_workers")]
    pub publish: usize,

    /// Analytics pool size. Defaults to half the core count.
    #[serde(default = "default_analytics_workers")]
    pub analytics: usize,

    /// How long shutdown waits for in-flight jobs before abandoning them to
    /// lease-timeout recovery.
    #[serde(default = "default_drain_deadline_secs")]
    pub drain_deadline_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            publish: default_publish_workers(),
            analytics: default_analytics_workers(),
            drain_deadline_secs: default_drain_deadline_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn drain_deadline(&self) -> Duration {
        Duration::from_secs(self.drain_deadline_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformsConfig {
    pub website: Option<WebsiteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsiteConfig {
    pub enabled: bool,
    /// Base URL of the client site's publishing endpoint.
    pub endpoint: String,
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_idle_poll_ms() -> u64 {
    1000
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_retry_max_secs() -> u64 {
    60
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_analytics_delay_secs() -> u64 {
    900
}

fn default_analytics_poll_secs() -> u64 {
    3600
}

fn default_analytics_max_poll_secs() -> u64 {
    86_400
}

fn default_analytics_widen_step_secs() -> u64 {
    86_400
}

fn default_analytics_horizon_secs() -> u64 {
    30 * 86_400
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_publish_workers() -> usize {
    num_cpus::get().max(1)
}

fn default_analytics_workers() -> usize {
    (num_cpus::get() / 2).max(1)
}

fn default_drain_deadline_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/fanout/fanout.db".to_string(),
            },
            queue: QueueConfig::default(),
            retry: RetryConfig::default(),
            publish: PublishConfig::default(),
            analytics: AnalyticsConfig::default(),
            scheduler: SchedulerConfig::default(),
            workers: WorkerConfig::default(),
            platforms: PlatformsConfig::default(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("FANOUT_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("fanout").join("config.toml"))
}
