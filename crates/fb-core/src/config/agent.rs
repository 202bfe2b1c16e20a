//! Agent configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{byte_size, duration_secs};
use crate::error::ConfigError;
use crate::types::AgentId;

/// Configuration for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Identity presented to the coordinator (defaults to the hostname)
    pub agent_id: String,

    /// WebSocket endpoint of the coordinator
    pub coordinator_url: String,

    /// Bearer credential presented on connect
    pub token: Option<String>,

    /// File uploaded when a command names none
    pub default_file_path: String,

    /// Backoff configuration for reconnections
    pub backoff: BackoffConfig,

    /// Connection timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// How often the agent pings the coordinator
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Silence after which the channel is considered dead
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,

    /// Upper bound on waiting for in-flight command handlers on disconnect
    #[serde(with = "duration_secs")]
    pub drain_timeout: Duration,

    /// Timeout for a single part upload
    #[serde(with = "duration_secs")]
    pub part_timeout: Duration,

    /// Parts uploaded in parallel within one transfer
    pub upload_concurrency: usize,

    /// Largest WebSocket frame sent or accepted, in bytes
    #[serde(with = "byte_size")]
    pub max_message_size: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: gethostname::gethostname().to_string_lossy().into_owned(),
            coordinator_url: "ws://localhost:8080/ws/connect".to_string(),
            token: None,
            default_file_path: "/data/report.bin".to_string(),
            backoff: BackoffConfig::default(),
            connect_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            drain_timeout: Duration::from_secs(30),
            part_timeout: Duration::from_secs(300),
            upload_concurrency: 1,
            max_message_size: fb_protocol::MAX_FRAME_SIZE,
        }
    }
}

impl AgentConfig {
    /// Parse the configured agent id
    pub fn agent_id(&self) -> Result<AgentId, ConfigError> {
        AgentId::new(self.agent_id.clone())
            .map_err(|e| ConfigError::Invalid(format!("agent_id: {}", e)))
    }

    /// Check the configuration for values the agent cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.agent_id()?;
        if !(self.coordinator_url.starts_with("ws://") || self.coordinator_url.starts_with("wss://"))
        {
            return Err(ConfigError::Invalid(format!(
                "coordinator_url must be a ws:// or wss:// URL, got {}",
                self.coordinator_url
            )));
        }
        if self.upload_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "upload_concurrency must be at least 1".into(),
            ));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(ConfigError::Invalid(
                "heartbeat_timeout must be longer than a non-zero heartbeat_interval".into(),
            ));
        }
        self.backoff.validate()
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial.is_zero() || self.max < self.initial {
            return Err(ConfigError::Invalid(
                "backoff.max must be at least backoff.initial, which must be non-zero".into(),
            ));
        }
        if self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff.multiplier must be at least 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(
                "backoff.jitter must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }
}
