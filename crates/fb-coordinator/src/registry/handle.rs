//! Handle to one live agent channel

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use fb_core::AgentId;
use fb_protocol::Message;

use super::RegistryError;

/// Capacity of the per-channel outbound queue.
///
/// The queue is drained by the channel's single writer task; senders wait
/// when it is full.
pub const OUTBOUND_CAPACITY: usize = 64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// An agent's live duplex channel as seen by the coordinator
///
/// All frames for the agent go through `outbound`, which is drained by
/// exactly one writer task, so frames never interleave on the socket.
#[derive(Debug)]
pub struct ChannelHandle {
    agent_id: AgentId,
    connection_id: u64,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
    connected_at: DateTime<Utc>,
    /// Monotonic clock reading at connect time; liveness is measured on it
    opened: Instant,
    /// Milliseconds after `opened` of the last ping/pong
    last_heartbeat_ms: AtomicU64,
    /// Milliseconds after `opened` of the last inbound frame of any kind
    last_activity_ms: AtomicU64,
    metadata: DashMap<String, String>,
}

impl ChannelHandle {
    /// Create a handle for a freshly accepted connection
    pub fn new(
        agent_id: AgentId,
        outbound: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            agent_id,
            connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            outbound,
            cancel,
            connected_at: Utc::now(),
            opened: Instant::now(),
            last_heartbeat_ms: AtomicU64::new(0),
            last_activity_ms: AtomicU64::new(0),
            metadata: DashMap::new(),
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Distinguishes this connection from earlier or later ones of the same agent
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Token that closes the connection when cancelled
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Close the connection
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }

    /// Resolves once the connection has been closed
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    /// Queue a message for the writer task
    pub async fn send(&self, message: Message) -> Result<(), RegistryError> {
        if self.cancel.is_cancelled() {
            return Err(RegistryError::ChannelClosed(self.agent_id.clone()));
        }
        self.outbound
            .send(message)
            .await
            .map_err(|_| RegistryError::ChannelClosed(self.agent_id.clone()))
    }

    /// Queue a message without waiting for room
    pub fn try_send(&self, message: Message) -> Result<(), RegistryError> {
        if self.cancel.is_cancelled() {
            return Err(RegistryError::ChannelClosed(self.agent_id.clone()));
        }
        self.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RegistryError::QueueFull(self.agent_id.clone()),
            mpsc::error::TrySendError::Closed(_) => {
                RegistryError::ChannelClosed(self.agent_id.clone())
            }
        })
    }

    /// Record an inbound frame
    pub fn touch_activity(&self) {
        self.last_activity_ms.store(self.elapsed_ms(), Ordering::Relaxed);
    }

    /// Record an inbound ping or pong
    pub fn touch_heartbeat(&self) {
        let now = self.elapsed_ms();
        self.last_heartbeat_ms.store(now, Ordering::Relaxed);
        self.last_activity_ms.store(now, Ordering::Relaxed);
    }

    /// Time since the last inbound frame
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.opened.elapsed().saturating_sub(last)
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        self.wall_clock(self.last_heartbeat_ms.load(Ordering::Relaxed))
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.wall_clock(self.last_activity_ms.load(Ordering::Relaxed))
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn metadata(&self) -> HashMap<String, String> {
        self.metadata
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    fn elapsed_ms(&self) -> u64 {
        self.opened.elapsed().as_millis() as u64
    }

    fn wall_clock(&self, offset_ms: u64) -> DateTime<Utc> {
        self.connected_at + chrono::Duration::milliseconds(offset_ms as i64)
    }
}
