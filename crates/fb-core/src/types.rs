//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::IdError;

/// Longest accepted agent id
pub const MAX_AGENT_ID_LEN: usize = 128;

/// Random bytes in a transfer id (hex-encoded to twice this length)
const TRANSFER_ID_BYTES: usize = 16;

/// Unique identifier for an agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    /// Create an agent ID, checking that it is usable as a registry key and
    /// as a blob key segment
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdError::Empty);
        }
        let len = id.chars().count();
        if len > MAX_AGENT_ID_LEN {
            return Err(IdError::TooLong {
                len,
                max: MAX_AGENT_ID_LEN,
            });
        }
        if let Some(c) = id
            .chars()
            .find(|c| c.is_control() || *c == '/' || *c == '\\')
        {
            return Err(IdError::InvalidCharacter(c));
        }
        Ok(Self(id))
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for AgentId {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<&str> for AgentId {
    type Error = IdError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

/// Unique identifier for a transfer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(String);

impl TransferId {
    /// Generate a new cryptographically random transfer ID
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; TRANSFER_ID_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TransferId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TransferId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Ticket issued, agent has not acknowledged yet
    Pending,
    /// Agent is uploading
    InProgress,
    /// Blob store session finalized
    Completed,
    /// Upload or finalization failed
    Failed,
    /// Cancelled by an operator
    Cancelled,
}

impl TransferStatus {
    /// Whether the status accepts no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Pending => write!(f, "pending"),
            TransferStatus::InProgress => write!(f, "in_progress"),
            TransferStatus::Completed => write!(f, "completed"),
            TransferStatus::Failed => write!(f, "failed"),
            TransferStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Connection state of an agent's channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No channel, a connection attempt is due
    Disconnected,
    /// Dialing the coordinator
    Connecting,
    /// Channel is up
    Connected,
    /// Stopped, no further attempts will be made
    ShuttingDown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}
