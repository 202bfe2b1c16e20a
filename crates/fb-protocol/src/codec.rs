//! JSON text codec for channel frames
//!
//! Each WebSocket text frame carries exactly one [`Message`]. Decoding reads
//! the `type` discriminator before the body so that an unknown type can be
//! reported (and skipped) separately from a malformed frame.

use serde_json::Value;

use crate::error::ProtocolError;
use crate::message::{Message, MessageType};

/// Default read limit for a single frame (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Codec for encoding/decoding protocol frames
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    /// Largest accepted frame, in bytes
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a codec with the default read limit
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom read limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Largest accepted frame, in bytes
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Serialize a message into a text frame
    pub fn encode(&self, message: &Message) -> Result<String, ProtocolError> {
        let text = serde_json::to_string(message)?;
        if text.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: text.len(),
                max: self.max_frame_size,
            });
        }
        Ok(text)
    }

    /// Parse a text frame into a message
    pub fn decode(&self, text: &str) -> Result<Message, ProtocolError> {
        if text.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: text.len(),
                max: self.max_frame_size,
            });
        }

        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::MalformedFrame("missing `type` field".to_string()))?;

        if MessageType::parse(kind).is_none() {
            return Err(ProtocolError::UnknownMessageType(kind.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CancelUploadRequest, Command};
    use crate::message::{Action, CommandMessage, ResponseMessage, ResponseStatus};

    #[test]
    fn test_codec_command_frame() {
        let codec = FrameCodec::new();
        let cmd = CommandMessage::new(Command::CancelUpload(CancelUploadRequest {
            upload_id: "abc".into(),
        }))
        .unwrap();

        let text = codec.encode(&Message::Command(cmd.clone())).unwrap();
        let decoded = codec.decode(&text).unwrap();
        assert_eq!(decoded, Message::Command(cmd));
    }

    #[test]
    fn test_codec_response_frame() {
        let codec = FrameCodec::new();
        let response = ResponseMessage::new(
            ResponseStatus::InProgress,
            "abc",
            Action::DownloadFile,
            serde_json::json!({ "upload_id": "abc" }),
        );

        let text = codec.encode(&Message::Response(response)).unwrap();
        match codec.decode(&text).unwrap() {
            Message::Response(r) => {
                assert_eq!(r.status, ResponseStatus::InProgress);
                assert_eq!(r.command_id, "abc");
            }
            other => panic!("Expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_codec_unknown_type() {
        let codec = FrameCodec::new();
        let err = codec.decode(r#"{"type":"telemetry","cpu":3}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageType(t) if t == "telemetry"));
    }

    #[test]
    fn test_codec_malformed() {
        let codec = FrameCodec::new();
        assert!(matches!(
            codec.decode("not json"),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(matches!(
            codec.decode(r#"{"message_id":"x"}"#),
            Err(ProtocolError::MalformedFrame(_))
        ));
        // Known type, wrong body
        assert!(matches!(
            codec.decode(r#"{"type":"response","status":"weird"}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_codec_size_limit() {
        let codec = FrameCodec::with_max_frame_size(16);
        let err = codec.decode(&"x".repeat(17)).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { size: 17, max: 16 }));

        assert!(matches!(
            codec.encode(&Message::ping()),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }
}
