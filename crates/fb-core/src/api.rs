//! JSON bodies of the coordinator HTTP API
//!
//! Shared by the coordinator's handlers and the `fetchback` CLI client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::types::TransferStatus;

/// `GET /`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub endpoints: BTreeMap<String, String>,
}

/// `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub time: DateTime<Utc>,
    pub clients: usize,
}

/// Body of `POST /trigger-download/:client_id`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// Reply to `POST /trigger-download/:client_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub success: bool,
    pub message: String,
    pub upload_id: String,
    pub s3_key: String,
}

/// Projection of one transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferInfo {
    pub upload_id: String,
    pub client_id: String,
    pub file_path: String,
    pub s3_key: String,
    pub bucket: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub status: TransferStatus,
    /// Percentage of parts uploaded (0.0 to 100.0)
    pub progress: f64,
    pub completed_parts: u32,
    pub total_parts: u32,
    pub bytes_uploaded: u64,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /status/:client_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusResponse {
    pub client_id: String,
    pub connected: bool,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub current_upload: Option<TransferInfo>,
    pub total_uploads: usize,
    pub success_uploads: usize,
    pub failed_uploads: usize,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// One connected agent in `GET /clients`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub client_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// `GET /clients`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientList {
    pub clients: Vec<ClientSummary>,
    pub count: usize,
}

/// Reply to `POST /uploads/:upload_id/cancel`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
}

/// Body of every non-2xx reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
