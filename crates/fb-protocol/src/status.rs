//! Agent progress reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::EtagMap;

/// Periodic report sent by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Send time
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Reporting agent
    pub client_id: String,
    /// Free-form agent state (`idle`, `uploading`, ...)
    pub status: String,
    /// Progress of the running upload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_upload: Option<UploadProgress>,
    /// Host description, sent once after connecting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_info: Option<SystemInfo>,
}

impl StatusMessage {
    /// Status without an upload attached
    pub fn new(client_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            client_id: client_id.into(),
            status: status.into(),
            current_upload: None,
            system_info: None,
        }
    }
}

/// Snapshot of one upload's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    /// Transfer id
    pub upload_id: String,
    /// Local path being uploaded
    pub file_path: String,
    /// File size
    pub file_size: u64,
    /// Parts needed for the file
    pub total_parts: u32,
    /// Parts acknowledged so far
    pub completed_parts: u32,
    /// Bytes acknowledged so far
    pub bytes_uploaded: u64,
    /// Percentage, 0-100
    pub progress: f64,
    /// Digests of the parts acknowledged so far
    #[serde(default, skip_serializing_if = "EtagMap::is_empty")]
    pub etags: EtagMap,
}

/// Host description reported by an agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Hostname
    #[serde(default)]
    pub hostname: String,
    /// Operating system (e.g., "linux")
    #[serde(default)]
    pub os: String,
    /// CPU architecture (e.g., "x86_64")
    #[serde(default)]
    pub architecture: String,
}
