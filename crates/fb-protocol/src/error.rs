//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding channel frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame is not a JSON object with a string `type` field
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame carries a `type` this side does not understand
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// Frame exceeds the configured read limit
    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// Command or response payload does not match the shape its action requires
    #[error("Invalid payload for {action}: {reason}")]
    InvalidPayload { action: String, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
