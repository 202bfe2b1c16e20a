//! Transfer orchestration
//!
//! A transfer moves a file from an agent into the blob store:
//!
//! ```text
//! Pending --in_progress/status--> InProgress --success--> Completed
//!    |                                |
//!    +------------ error -------------+--> Failed
//!    +----------- cancelled ----------+--> Cancelled
//! ```
//!
//! Terminal states accept no further transitions.

mod orchestrator;
mod record;

pub use orchestrator::{AgentTransferSummary, TransferOrchestrator, TriggerOutcome};
pub use record::TransferRecord;

use thiserror::Error;

use fb_core::{AgentId, TransferStatus};
use fb_protocol::ProtocolError;

use crate::blob::BlobError;
use crate::registry::RegistryError;

/// Transfer orchestration errors
#[derive(Error, Debug)]
pub enum TransferError {
    /// The agent has no live channel
    #[error("agent {0} is not connected")]
    NotConnected(AgentId),

    /// Unknown transfer id
    #[error("transfer {0} not found")]
    NotFound(String),

    /// The transfer already finished
    #[error("transfer {id} is already {status}")]
    AlreadyTerminal { id: String, status: TransferStatus },

    /// Blob store operation failed
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// Data was uploaded but the session could not be finalized
    #[error("finalization failed (data uploaded but not finalized): {0}")]
    FinalizationFailed(String),

    /// The agent's report could not be applied
    #[error("invalid report from agent: {0}")]
    InvalidReport(String),

    /// Could not build or decode a protocol message
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The command could not be delivered
    #[error(transparent)]
    Delivery(RegistryError),
}

impl From<RegistryError> for TransferError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotConnected(agent) => TransferError::NotConnected(agent),
            other => TransferError::Delivery(other),
        }
    }
}
