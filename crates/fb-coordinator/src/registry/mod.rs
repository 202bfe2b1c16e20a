//! Registry of live agent channels
//!
//! The registry maps each agent id to the handle of its one live duplex
//! channel. It is the coordinator's only route to an agent: commands are
//! written through [`ChannelRegistry::send_command`], which encodes each
//! frame against the configured limit before queuing it so an oversized
//! command is a delivery error rather than a frame the socket drops.
//!
//! # Locking
//!
//! The map sits behind a `tokio::sync::RwLock`. Lookups take the read lock;
//! registration and removal take the write lock. Handles are cloned out of
//! the map before any I/O so no lock is held across a socket write.
//!
//! # Supersession
//!
//! At most one handle exists per agent id. Registering a second handle closes
//! the first. When the superseded connection tears down it calls
//! [`ChannelRegistry::unregister_connection`], which only removes the entry if
//! it still belongs to that connection.

mod handle;
pub mod heartbeat;

pub use handle::{ChannelHandle, OUTBOUND_CAPACITY};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use fb_core::AgentId;
use fb_protocol::{CommandMessage, FrameCodec, Message};

/// Errors returned when writing to an agent channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No live channel for the agent
    #[error("agent {0} is not connected")]
    NotConnected(AgentId),

    /// The channel closed before the frame could be queued
    #[error("channel to agent {0} is closed")]
    ChannelClosed(AgentId),

    /// The outbound queue has no room
    #[error("outbound queue to agent {0} is full")]
    QueueFull(AgentId),

    /// The command does not fit in one frame
    #[error("command for agent {agent_id} cannot be sent: {reason}")]
    Unencodable { agent_id: AgentId, reason: String },
}

/// Registry of live agent channels
pub struct ChannelRegistry {
    channels: RwLock<HashMap<AgentId, Arc<ChannelHandle>>>,
    codec: FrameCodec,
}

impl ChannelRegistry {
    /// Create an empty registry with the default frame limit
    pub fn new() -> Self {
        Self::with_codec(FrameCodec::new())
    }

    /// Create an empty registry whose commands must fit `codec`'s frame limit
    pub fn with_codec(codec: FrameCodec) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            codec,
        }
    }

    /// Register a channel, closing and returning any handle it supersedes
    pub async fn register(&self, handle: Arc<ChannelHandle>) -> Option<Arc<ChannelHandle>> {
        let agent_id = handle.agent_id().clone();
        let connection_id = handle.connection_id();

        let previous = {
            let mut channels = self.channels.write().await;
            channels.insert(agent_id.clone(), handle)
        };

        if let Some(old) = &previous {
            old.close();
            tracing::info!(
                "Agent {} reconnected (connection {} supersedes {})",
                agent_id,
                connection_id,
                old.connection_id()
            );
        } else {
            tracing::info!("Agent {} connected (connection {})", agent_id, connection_id);
        }

        previous
    }

    /// Close and remove an agent's channel
    pub async fn unregister(&self, agent_id: &AgentId) -> Option<Arc<ChannelHandle>> {
        let removed = self.channels.write().await.remove(agent_id);
        if let Some(handle) = &removed {
            handle.close();
            tracing::info!("Agent {} disconnected", agent_id);
        }
        removed
    }

    /// Remove an agent's channel only if it is still the given connection.
    ///
    /// Returns `true` if the entry was removed.
    pub async fn unregister_connection(&self, agent_id: &AgentId, connection_id: u64) -> bool {
        let removed = {
            let mut channels = self.channels.write().await;
            match channels.get(agent_id) {
                Some(current) if current.connection_id() == connection_id => {
                    channels.remove(agent_id)
                }
                _ => None,
            }
        };

        match removed {
            Some(handle) => {
                handle.close();
                tracing::info!(
                    "Agent {} disconnected (connection {})",
                    agent_id,
                    connection_id
                );
                true
            }
            None => {
                tracing::debug!(
                    "Connection {} of agent {} already superseded",
                    connection_id,
                    agent_id
                );
                false
            }
        }
    }

    /// Whether the agent has a live channel
    pub async fn is_connected(&self, agent_id: &AgentId) -> bool {
        self.channels
            .read()
            .await
            .get(agent_id)
            .map(|h| !h.is_closed())
            .unwrap_or(false)
    }

    /// Ids of all connected agents, sorted
    pub async fn list_connected(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.channels.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Handles of all connected agents, sorted by agent id
    pub async fn handles(&self) -> Vec<Arc<ChannelHandle>> {
        let mut handles: Vec<Arc<ChannelHandle>> =
            self.channels.read().await.values().cloned().collect();
        handles.sort_by(|a, b| a.agent_id().cmp(b.agent_id()));
        handles
    }

    /// Get an agent's handle
    pub async fn get(&self, agent_id: &AgentId) -> Option<Arc<ChannelHandle>> {
        self.channels.read().await.get(agent_id).cloned()
    }

    /// Number of connected agents
    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Check if no agent is connected
    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }

    /// Stamp and send a command to an agent
    pub async fn send_command(
        &self,
        agent_id: &AgentId,
        mut command: CommandMessage,
    ) -> Result<(), RegistryError> {
        let handle = self
            .get(agent_id)
            .await
            .ok_or_else(|| RegistryError::NotConnected(agent_id.clone()))?;

        command.timestamp = Utc::now();
        tracing::debug!(
            "Sending {} command {} to agent {}",
            command.action,
            command.message_id,
            agent_id
        );
        let message = Message::Command(command);
        self.codec
            .encode(&message)
            .map_err(|e| RegistryError::Unencodable {
                agent_id: agent_id.clone(),
                reason: e.to_string(),
            })?;
        handle.send(message).await
    }

    /// Close every channel
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.channels.write().await.drain().collect();
        for (_, handle) in &handles {
            handle.close();
        }
        if !handles.is_empty() {
            tracing::info!("Closed {} agent channel(s)", handles.len());
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fb_protocol::{CancelUploadRequest, Command};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn create_handle(id: &str) -> (Arc<ChannelHandle>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let handle = ChannelHandle::new(AgentId::new(id).unwrap(), tx, CancellationToken::new());
        (Arc::new(handle), rx)
    }

    fn agent(id: &str) -> AgentId {
        AgentId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ChannelRegistry::new();
        let (handle, _rx) = create_handle("agent-1");

        assert!(registry.register(handle).await.is_none());
        assert!(registry.is_connected(&agent("agent-1")).await);
        assert!(!registry.is_connected(&agent("agent-2")).await);
        assert_eq!(registry.list_connected().await, vec![agent("agent-1")]);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_second_registration_supersedes_first() {
        let registry = ChannelRegistry::new();
        let (first, _rx1) = create_handle("agent-1");
        let (second, _rx2) = create_handle("agent-1");

        registry.register(first.clone()).await;
        let previous = registry.register(second.clone()).await.unwrap();

        assert_eq!(previous.connection_id(), first.connection_id());
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(registry.len().await, 1);

        // The superseded connection tearing down must not evict its replacement
        assert!(
            !registry
                .unregister_connection(&agent("agent-1"), first.connection_id())
                .await
        );
        assert!(registry.is_connected(&agent("agent-1")).await);

        assert!(
            registry
                .unregister_connection(&agent("agent-1"), second.connection_id())
                .await
        );
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregister_closes() {
        let registry = ChannelRegistry::new();
        let (handle, _rx) = create_handle("agent-1");
        registry.register(handle.clone()).await;

        assert!(registry.unregister(&agent("agent-1")).await.is_some());
        assert!(handle.is_closed());
        assert!(registry.unregister(&agent("agent-1")).await.is_none());
    }

    #[tokio::test]
    async fn test_send_command() {
        let registry = ChannelRegistry::new();
        let cmd = CommandMessage::new(Command::CancelUpload(CancelUploadRequest {
            upload_id: "u1".into(),
        }))
        .unwrap();

        assert_eq!(
            registry.send_command(&agent("agent-1"), cmd.clone()).await,
            Err(RegistryError::NotConnected(agent("agent-1")))
        );

        let (handle, mut rx) = create_handle("agent-1");
        registry.register(handle).await;
        registry.send_command(&agent("agent-1"), cmd.clone()).await.unwrap();

        match rx.recv().await {
            Some(Message::Command(sent)) => assert_eq!(sent.message_id, cmd.message_id),
            other => panic!("Expected command, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_command_rejects_oversized_frame() {
        let registry = ChannelRegistry::with_codec(FrameCodec::with_max_frame_size(64));
        let (handle, mut rx) = create_handle("agent-1");
        registry.register(handle).await;

        let cmd = CommandMessage::new(Command::CancelUpload(CancelUploadRequest {
            upload_id: "u".repeat(128),
        }))
        .unwrap();
        let err = registry
            .send_command(&agent("agent-1"), cmd)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unencodable { .. }));
        assert!(err.to_string().contains("too large"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_closes_all() {
        let registry = ChannelRegistry::new();
        let (a, _ra) = create_handle("agent-1");
        let (b, _rb) = create_handle("agent-2");
        registry.register(a.clone()).await;
        registry.register(b.clone()).await;

        registry.shutdown().await;
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(registry.is_empty().await);
    }
}
