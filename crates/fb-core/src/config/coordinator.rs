//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{byte_size, duration_secs};
use crate::error::ConfigError;

/// Longest presigned URL lifetime accepted by SigV4 (7 days)
const MAX_URL_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Most parts a single multipart upload may have
pub const MAX_PARTS: u64 = 10_000;

/// Frame bytes reserved for each presigned part URL in a ticket
pub const PART_URL_BUDGET: usize = 2048;

/// Frame bytes reserved for the rest of a `download_file` command
pub const TICKET_OVERHEAD: usize = 16 * 1024;

/// Configuration for the coordinator daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Address to bind the HTTP/WebSocket server to
    pub bind_address: String,

    /// How often a ping is sent on every agent channel
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Silence after which a channel is considered dead
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,

    /// Upper bound on waiting for in-flight frame handlers when a channel closes
    #[serde(with = "duration_secs")]
    pub drain_timeout: Duration,

    /// Largest WebSocket frame sent or accepted, in bytes
    #[serde(with = "byte_size")]
    pub max_message_size: usize,

    /// Transfer provisioning
    pub transfer: TransferConfig,

    /// Blob store backend
    pub blob: BlobConfig,

    /// Agent authentication
    pub auth: AuthConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            drain_timeout: Duration::from_secs(10),
            max_message_size: fb_protocol::MAX_FRAME_SIZE,
            transfer: TransferConfig::default(),
            blob: BlobConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Check the configuration for values the coordinator cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.trim().is_empty() {
            return Err(ConfigError::MissingField("bind_address".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat_interval must be greater than zero".into(),
            ));
        }
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(ConfigError::Invalid(
                "heartbeat_timeout must be longer than heartbeat_interval".into(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max_message_size must be greater than zero".into(),
            ));
        }
        self.transfer.validate()?;
        let ticket = self.transfer.ticket_budget();
        if ticket > self.max_message_size {
            return Err(ConfigError::Invalid(format!(
                "a ticket of {} parts needs up to {} bytes but max_message_size is {}; \
                 raise transfer.chunk_size or max_message_size",
                self.transfer.part_count(),
                ticket,
                self.max_message_size
            )));
        }
        self.blob.validate()?;
        if self.auth.require_token && self.auth.secret.is_none() {
            return Err(ConfigError::MissingField("auth.secret".into()));
        }
        Ok(())
    }
}

/// How transfers are provisioned
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Size of each uploaded part, in bytes
    #[serde(with = "byte_size")]
    pub chunk_size: u64,

    /// Assumed file size used to size every ticket
    #[serde(with = "byte_size")]
    pub ceiling_size: u64,

    /// Lifetime of each presigned part URL
    #[serde(with = "duration_secs")]
    pub url_expiry: Duration,

    /// First segment of every object key
    pub key_prefix: String,

    /// File requested when a trigger names none
    pub default_file_path: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5 * 1024 * 1024,
            ceiling_size: 100 * 1024 * 1024,
            url_expiry: Duration::from_secs(900),
            key_prefix: "uploads".to_string(),
            default_file_path: "/data/test-file.bin".to_string(),
        }
    }
}

impl TransferConfig {
    /// Number of parts in every provisioned ticket
    pub fn part_count(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.ceiling_size.div_ceil(self.chunk_size).max(1)
    }

    /// Frame bytes a `download_file` command built from this config may need
    pub fn ticket_budget(&self) -> usize {
        usize::try_from(self.part_count())
            .unwrap_or(usize::MAX)
            .saturating_mul(PART_URL_BUDGET)
            .saturating_add(TICKET_OVERHEAD)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "transfer.chunk_size must be greater than zero".into(),
            ));
        }
        if self.part_count() > MAX_PARTS {
            return Err(ConfigError::Invalid(format!(
                "transfer.ceiling_size / chunk_size yields {} parts, maximum is {}",
                self.part_count(),
                MAX_PARTS
            )));
        }
        if self.url_expiry.is_zero() || self.url_expiry > MAX_URL_EXPIRY {
            return Err(ConfigError::Invalid(
                "transfer.url_expiry must be between 1 second and 7 days".into(),
            ));
        }
        if self.key_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::MissingField("transfer.key_prefix".into()));
        }
        Ok(())
    }
}

/// Blob store backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    /// S3 or an S3-compatible endpoint
    #[default]
    S3,
    /// In-process store served by the coordinator itself
    Memory,
}

/// Blob store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Backend kind
    pub backend: BlobBackend,

    /// Bucket receiving uploads
    pub bucket: String,

    /// Bucket region
    pub region: String,

    /// Custom S3-compatible endpoint (path-style addressing is used when set)
    pub endpoint: Option<String>,

    /// Access key id (falls back to `AWS_ACCESS_KEY_ID`)
    pub access_key_id: Option<String>,

    /// Secret access key (falls back to `AWS_SECRET_ACCESS_KEY`)
    pub secret_access_key: Option<String>,

    /// Session token (falls back to `AWS_SESSION_TOKEN`)
    pub session_token: Option<String>,

    /// Externally reachable base URL of the coordinator, used by the memory
    /// backend to build part URLs
    pub public_url: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::S3,
            bucket: "fetchback-uploads".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            public_url: "http://localhost:8080".to_string(),
        }
    }
}

impl BlobConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::MissingField("blob.bucket".into()));
        }
        if self.backend == BlobBackend::S3 && self.region.trim().is_empty() {
            return Err(ConfigError::MissingField("blob.region".into()));
        }
        Ok(())
    }
}

/// Agent authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret; token checks are disabled when absent
    pub secret: Option<String>,

    /// Expected `iss` claim
    pub issuer: String,

    /// Reject agents that present no token
    pub require_token: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: None,
            issuer: "fetchback".to_string(),
            require_token: false,
        }
    }
}
