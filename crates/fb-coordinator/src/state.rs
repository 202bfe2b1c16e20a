//! Shared coordinator state

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use fb_core::config::CoordinatorConfig;
use fb_protocol::FrameCodec;

use crate::auth::{JwtValidator, TokenValidator};
use crate::blob::BlobStore;
use crate::registry::ChannelRegistry;
use crate::transfer::TransferOrchestrator;

/// State shared by the HTTP handlers and every agent channel
pub struct CoordinatorState {
    /// Configuration
    pub config: CoordinatorConfig,
    /// Live agent channels
    pub registry: Arc<ChannelRegistry>,
    /// Transfer records and lifecycle
    pub transfers: Arc<TransferOrchestrator>,
    /// Credential check for connecting agents; absent when no secret is configured
    pub validator: Option<Arc<dyn TokenValidator>>,
    /// Cancelled on shutdown; every channel's token derives from it
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl CoordinatorState {
    /// Build the state, with a JWT validator when `auth.secret` is set
    pub fn new(config: CoordinatorConfig, blob: Arc<dyn BlobStore>) -> Self {
        let validator = config.auth.secret.as_ref().map(|secret| {
            Arc::new(JwtValidator::new(secret, config.auth.issuer.clone()))
                as Arc<dyn TokenValidator>
        });
        Self::with_validator(config, blob, validator)
    }

    /// Build the state with an explicit validator
    pub fn with_validator(
        config: CoordinatorConfig,
        blob: Arc<dyn BlobStore>,
        validator: Option<Arc<dyn TokenValidator>>,
    ) -> Self {
        let registry = Arc::new(ChannelRegistry::with_codec(FrameCodec::with_max_frame_size(
            config.max_message_size,
        )));
        let transfers = Arc::new(TransferOrchestrator::new(
            config.transfer.clone(),
            registry.clone(),
            blob,
        ));
        Self {
            config,
            registry,
            transfers,
            validator,
            shutdown: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }

    /// Codec honouring the configured frame limit
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::with_max_frame_size(self.config.max_message_size)
    }

    /// Stop accepting work and close every channel
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.shutdown().await;
    }
}
