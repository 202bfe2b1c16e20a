//! Typed command and response payloads

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::message::Action;

/// Part number → digest (ETag) map, keyed by the decimal part number
pub type EtagMap = BTreeMap<String, String>;

/// A decoded command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Upload a local file using the attached ticket
    DownloadFile(DownloadFileRequest),
    /// Stop an in-flight upload
    CancelUpload(CancelUploadRequest),
    /// Application-level health check
    HealthCheck,
}

impl Command {
    /// Action name for this command
    pub fn action(&self) -> Action {
        match self {
            Command::DownloadFile(_) => Action::DownloadFile,
            Command::CancelUpload(_) => Action::CancelUpload,
            Command::HealthCheck => Action::HealthCheck,
        }
    }

    pub(crate) fn to_payload(&self) -> Result<Value, ProtocolError> {
        Ok(match self {
            Command::DownloadFile(req) => serde_json::to_value(req)?,
            Command::CancelUpload(req) => serde_json::to_value(req)?,
            Command::HealthCheck => Value::Null,
        })
    }

    pub(crate) fn from_parts(action: &Action, payload: &Value) -> Result<Self, ProtocolError> {
        let invalid = |e: serde_json::Error| ProtocolError::InvalidPayload {
            action: action.to_string(),
            reason: e.to_string(),
        };

        match action {
            Action::DownloadFile => serde_json::from_value(payload.clone())
                .map(Command::DownloadFile)
                .map_err(invalid),
            Action::CancelUpload => serde_json::from_value(payload.clone())
                .map(Command::CancelUpload)
                .map_err(invalid),
            Action::HealthCheck => Ok(Command::HealthCheck),
            Action::Other(name) => Err(ProtocolError::InvalidPayload {
                action: name.clone(),
                reason: format!("unknown command: {}", name),
            }),
        }
    }
}

/// Payload of a `download_file` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadFileRequest {
    /// File to upload; empty means the agent's configured default
    #[serde(default)]
    pub file_path: String,
    /// Where and how to upload
    pub upload_config: UploadTicket,
    /// Free-form operator metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Time-limited upload ticket for one transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTicket {
    /// Transfer id
    pub upload_id: String,
    /// Destination bucket
    pub bucket: String,
    /// Destination object key
    pub key: String,
    /// Blob store region
    #[serde(default)]
    pub region: String,
    /// Bytes per part (the last part may be shorter)
    pub chunk_size: u64,
    /// Presigned URLs in ascending part order
    pub presigned_urls: Vec<PartUrl>,
}

impl UploadTicket {
    /// Number of parts the ticket can carry
    pub fn part_count(&self) -> u32 {
        self.presigned_urls.len() as u32
    }

    /// Check that the ticket is usable: ids present, a non-zero chunk size and
    /// part numbers `1..=n` in ascending order.
    pub fn validate(&self) -> Result<(), String> {
        if self.upload_id.is_empty() {
            return Err("missing upload_id".to_string());
        }
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than zero".to_string());
        }
        if self.presigned_urls.is_empty() {
            return Err("no presigned URLs".to_string());
        }
        for (index, part) in self.presigned_urls.iter().enumerate() {
            let expected = index as u32 + 1;
            if part.part_number != expected {
                return Err(format!(
                    "part {} found where part {} was expected",
                    part.part_number, expected
                ));
            }
            if part.url.is_empty() {
                return Err(format!("part {} has no URL", part.part_number));
            }
        }
        Ok(())
    }
}

/// Presigned upload URL for one part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartUrl {
    /// 1-based part number
    pub part_number: u32,
    /// Presigned PUT URL
    pub url: String,
    /// When the URL stops being accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Payload of a `cancel_upload` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelUploadRequest {
    /// Transfer to cancel
    pub upload_id: String,
}

/// `in_progress` payload sent when a download command is accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadAccepted {
    /// Transfer id
    pub upload_id: String,
    /// Resolved local path
    pub file_path: String,
    /// Always `starting`
    pub status: String,
}

/// `success` payload of a `download_file` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadFileResult {
    /// Transfer id
    pub upload_id: String,
    /// Resolved local path
    #[serde(default)]
    pub file_path: String,
    /// Actual file size
    pub file_size: u64,
    /// Parts used for this file
    pub total_parts: u32,
    /// Parts acknowledged by the blob store
    pub completed_parts: u32,
    /// Bytes sent
    #[serde(default)]
    pub bytes_uploaded: u64,
    /// Upload wall time
    #[serde(default)]
    pub duration_ms: u64,
    /// Destination object key
    #[serde(default)]
    pub s3_key: String,
    /// Digest of every part
    pub etags: EtagMap,
}

/// `success` payload of a `health_check` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Always `healthy`
    pub status: String,
    /// Agent clock
    pub timestamp: DateTime<Utc>,
    /// Downloads currently running on the agent
    #[serde(default)]
    pub active_transfers: usize,
}

/// Parse an etag map into `(part number, etag)` pairs sorted by part number.
///
/// Keys are compared numerically, so part 10 sorts after part 9.
pub fn sorted_parts(etags: &EtagMap) -> Result<Vec<(u32, String)>, ProtocolError> {
    let mut parts = etags
        .iter()
        .map(|(key, etag)| {
            key.parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .map(|n| (n, etag.clone()))
                .ok_or_else(|| ProtocolError::InvalidPayload {
                    action: Action::DownloadFile.to_string(),
                    reason: format!("invalid part number {:?}", key),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    parts.sort_by_key(|(n, _)| *n);
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CommandMessage;

    fn ticket(parts: u32) -> UploadTicket {
        UploadTicket {
            upload_id: "t1".into(),
            bucket: "bucket".into(),
            key: "uploads/agent-1/x.bin".into(),
            region: "us-east-1".into(),
            chunk_size: 5,
            presigned_urls: (1..=parts)
                .map(|n| PartUrl {
                    part_number: n,
                    url: format!("http://blob/{}", n),
                    expires_at: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_download_command_decodes_in_two_stages() {
        let cmd = CommandMessage::with_id(
            "t1",
            Command::DownloadFile(DownloadFileRequest {
                file_path: "/data/a.bin".into(),
                upload_config: ticket(3),
                metadata: HashMap::new(),
            }),
        )
        .unwrap();

        let json = serde_json::to_string(&cmd).unwrap();
        let parsed: CommandMessage = serde_json::from_str(&json).unwrap();
        match parsed.command().unwrap() {
            Command::DownloadFile(req) => {
                assert_eq!(req.file_path, "/data/a.bin");
                assert_eq!(req.upload_config.part_count(), 3);
            }
            other => panic!("expected download, got {:?}", other),
        }
    }

    #[test]
    fn test_download_without_ticket_is_invalid_payload() {
        let cmd = CommandMessage {
            message_id: "m".into(),
            timestamp: Utc::now(),
            action: Action::DownloadFile,
            payload: serde_json::json!({ "file_path": "/x" }),
        };
        assert!(matches!(
            cmd.command(),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_health_check_ignores_payload() {
        let cmd = CommandMessage {
            message_id: "m".into(),
            timestamp: Utc::now(),
            action: Action::HealthCheck,
            payload: Value::Null,
        };
        assert_eq!(cmd.command().unwrap(), Command::HealthCheck);
    }

    #[test]
    fn test_ticket_validation() {
        assert!(ticket(2).validate().is_ok());

        let mut gap = ticket(3);
        gap.presigned_urls.remove(1);
        assert!(gap.validate().is_err());

        let mut empty = ticket(1);
        empty.upload_id.clear();
        assert!(empty.validate().is_err());

        assert!(ticket(0).validate().is_err());
    }

    #[test]
    fn test_sorted_parts_orders_numerically() {
        let mut etags = EtagMap::new();
        etags.insert("10".into(), "e10".into());
        etags.insert("2".into(), "e2".into());
        etags.insert("1".into(), "e1".into());

        let parts = sorted_parts(&etags).unwrap();
        let numbers: Vec<u32> = parts.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 10]);
        assert_eq!(parts[2].1, "e10");
    }

    #[test]
    fn test_sorted_parts_rejects_bad_keys() {
        let mut etags = EtagMap::new();
        etags.insert("zero".into(), "e".into());
        assert!(sorted_parts(&etags).is_err());

        let mut etags = EtagMap::new();
        etags.insert("0".into(), "e".into());
        assert!(sorted_parts(&etags).is_err());
    }
}
