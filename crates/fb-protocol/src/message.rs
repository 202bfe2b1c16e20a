//! Message types for the fetchback channel protocol
//!
//! Every frame on the duplex channel is one JSON object tagged by its `type`
//! field. The coordinator sends `command` messages; the agent answers with
//! `response` messages correlated by `command_id` and reports progress with
//! `status` messages. Either side may send `ping` and must answer with `pong`.
//!
//! # Message Flow
//!
//! Typical sequence for a file retrieval:
//!
//! 1. Agent connects and sends an `idle` `status` carrying its system info
//! 2. Coordinator sends `command` with action `download_file` and an upload ticket
//! 3. Agent answers `response` with status `in_progress`
//! 4. Agent sends `status` frames while parts are uploaded
//! 5. Agent answers `response` with status `success` (or `error`)
//!
//! # Payload Decoding
//!
//! Command and response payloads depend on the action. They are kept as raw
//! JSON on the envelope and decoded in a second step ([`CommandMessage::command`],
//! [`ResponseMessage::decode_payload`]) once the action is known.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::Command;
use crate::error::ProtocolError;
use crate::status::StatusMessage;

/// Current protocol version string.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Message type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Coordinator → agent instruction
    Command,
    /// Agent → coordinator answer to a command
    Response,
    /// Agent → coordinator progress report
    Status,
    /// Liveness check
    Ping,
    /// Liveness answer
    Pong,
}

impl MessageType {
    /// Wire name of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Response => "response",
            Self::Status => "status",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }

    /// Parse a wire name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "command" => Some(Self::Command),
            "response" => Some(Self::Response),
            "status" => Some(Self::Status),
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Instruction for the agent
    Command(CommandMessage),
    /// Answer to a command
    Response(ResponseMessage),
    /// Non-terminal progress report
    Status(StatusMessage),
    /// Heartbeat ping
    Ping(Heartbeat),
    /// Heartbeat acknowledgment
    Pong(Heartbeat),
}

impl Message {
    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Command(_) => MessageType::Command,
            Message::Response(_) => MessageType::Response,
            Message::Status(_) => MessageType::Status,
            Message::Ping(_) => MessageType::Ping,
            Message::Pong(_) => MessageType::Pong,
        }
    }

    /// A ping stamped with the current time
    pub fn ping() -> Self {
        Message::Ping(Heartbeat::now())
    }

    /// A pong stamped with the current time
    pub fn pong() -> Self {
        Message::Pong(Heartbeat::now())
    }
}

/// Payload of `ping` and `pong` frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Send time
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Heartbeat {
    /// Heartbeat stamped with the current time
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
        }
    }
}

/// Command action names.
///
/// Unknown names survive decoding as [`Action::Other`] so the agent can
/// answer them with an error response instead of dropping the frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    /// Upload a local file through the attached ticket
    DownloadFile,
    /// Stop an in-flight upload
    CancelUpload,
    /// Liveness check at the application level
    HealthCheck,
    /// Anything else
    Other(String),
}

impl Action {
    /// Wire name of this action
    pub fn as_str(&self) -> &str {
        match self {
            Action::DownloadFile => "download_file",
            Action::CancelUpload => "cancel_upload",
            Action::HealthCheck => "health_check",
            Action::Other(name) => name,
        }
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        match value.as_str() {
            "download_file" => Action::DownloadFile,
            "cancel_upload" => Action::CancelUpload,
            "health_check" => Action::HealthCheck,
            _ => Action::Other(value),
        }
    }
}

impl From<Action> for String {
    fn from(value: Action) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instruction sent from the coordinator to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    /// Unique id, echoed back as `command_id` in responses
    pub message_id: String,
    /// Send time
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// What the agent should do
    pub action: Action,
    /// Action-specific payload, decoded with [`CommandMessage::command`]
    #[serde(default)]
    pub payload: Value,
}

impl CommandMessage {
    /// Build a command with a fresh random message id
    pub fn new(command: Command) -> Result<Self, ProtocolError> {
        Self::with_id(uuid::Uuid::new_v4().to_string(), command)
    }

    /// Build a command with a caller-chosen message id
    pub fn with_id(message_id: impl Into<String>, command: Command) -> Result<Self, ProtocolError> {
        let action = command.action();
        let payload = command.to_payload()?;
        Ok(Self {
            message_id: message_id.into(),
            timestamp: Utc::now(),
            action,
            payload,
        })
    }

    /// Decode the payload into the concrete command for this action
    pub fn command(&self) -> Result<Command, ProtocolError> {
        Command::from_parts(&self.action, &self.payload)
    }
}

/// Outcome status carried by a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Command finished successfully
    Success,
    /// Command failed
    Error,
    /// Command accepted, still running
    InProgress,
    /// Command was cancelled
    Cancelled,
}

impl ResponseStatus {
    /// Whether no further response is expected for the command
    pub fn is_final(&self) -> bool {
        !matches!(self, ResponseStatus::InProgress)
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseStatus::Success => write!(f, "success"),
            ResponseStatus::Error => write!(f, "error"),
            ResponseStatus::InProgress => write!(f, "in_progress"),
            ResponseStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Answer sent from an agent to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Unique id of this response
    pub message_id: String,
    /// Send time
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Outcome
    pub status: ResponseStatus,
    /// `message_id` of the command being answered
    pub command_id: String,
    /// Action of the command being answered
    pub action: Action,
    /// Action-specific payload
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    /// Failure description for `error` responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseMessage {
    /// Build a response with an arbitrary payload
    pub fn new(
        status: ResponseStatus,
        command_id: impl Into<String>,
        action: Action,
        payload: Value,
    ) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            status,
            command_id: command_id.into(),
            action,
            payload,
            error: None,
        }
    }

    /// Build a response carrying a typed payload
    pub fn with_payload<T: Serialize>(
        status: ResponseStatus,
        command_id: impl Into<String>,
        action: Action,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            status,
            command_id,
            action,
            serde_json::to_value(payload)?,
        ))
    }

    /// Build an `error` response
    pub fn error(command_id: impl Into<String>, action: Action, error: impl Into<String>) -> Self {
        let mut response = Self::new(ResponseStatus::Error, command_id, action, Value::Null);
        response.error = Some(error.into());
        response
    }

    /// Decode the payload into the type expected for this action
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| ProtocolError::InvalidPayload {
            action: self.action.to_string(),
            reason: e.to_string(),
        })
    }
}
