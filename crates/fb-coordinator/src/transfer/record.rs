//! Per-transfer state

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use fb_core::api::TransferInfo;
use fb_core::{AgentId, TransferId, TransferStatus};
use fb_protocol::EtagMap;

use crate::blob::CompletedPart;

/// Everything the coordinator knows about one transfer
///
/// `completed_parts` always equals `etags.len()`, and nothing changes once
/// the status is terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub id: TransferId,
    pub agent_id: AgentId,
    pub file_path: String,
    pub bucket: String,
    pub key: String,
    /// Blob store multipart session
    pub session_id: String,
    /// Ticketed size until the agent reports the real one
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_parts: u32,
    pub completed_parts: u32,
    pub bytes_uploaded: u64,
    /// Part number to ETag
    pub etags: BTreeMap<u32, String>,
    pub status: TransferStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl TransferRecord {
    /// A freshly provisioned transfer
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TransferId,
        agent_id: AgentId,
        file_path: String,
        bucket: String,
        key: String,
        session_id: String,
        file_size: u64,
        chunk_size: u64,
        total_parts: u32,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            id,
            agent_id,
            file_path,
            bucket,
            key,
            session_id,
            file_size,
            chunk_size,
            total_parts,
            completed_parts: 0,
            bytes_uploaded: 0,
            etags: BTreeMap::new(),
            status: TransferStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            metadata,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `Pending` becomes `InProgress`; returns whether anything changed
    pub fn mark_in_progress(&mut self) -> bool {
        if self.status != TransferStatus::Pending {
            return false;
        }
        self.status = TransferStatus::InProgress;
        true
    }

    /// Merge agent-reported ETags (keyed by decimal part number).
    ///
    /// Returns `false` without applying anything if a key is not a valid part
    /// number or the record is terminal.
    pub fn merge_etags(&mut self, etags: &EtagMap) -> bool {
        if self.is_terminal() {
            return false;
        }
        let parsed = match fb_protocol::sorted_parts(etags) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Transfer {}: ignoring etags: {}", self.id, e);
                return false;
            }
        };
        for (part, etag) in parsed {
            self.etags.insert(part, etag);
        }
        self.completed_parts = self.etags.len() as u32;
        true
    }

    /// Update size counters from an agent report
    pub fn apply_counters(&mut self, file_size: u64, total_parts: u32, bytes_uploaded: u64) {
        if self.is_terminal() {
            return;
        }
        self.file_size = file_size;
        if total_parts > 0 {
            self.total_parts = total_parts;
        }
        self.bytes_uploaded = bytes_uploaded;
    }

    /// Parts `1..=required` in ascending order, or the missing part numbers
    pub fn ordered_parts(&self, required: u32) -> Result<Vec<CompletedPart>, Vec<u32>> {
        let missing: Vec<u32> = (1..=required)
            .filter(|n| !self.etags.contains_key(n))
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }
        Ok((1..=required)
            .filter_map(|n| {
                self.etags.get(&n).map(|etag| CompletedPart {
                    part_number: n,
                    etag: etag.clone(),
                })
            })
            .collect())
    }

    pub fn mark_completed(&mut self) -> bool {
        self.finish(TransferStatus::Completed, None)
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> bool {
        self.finish(TransferStatus::Failed, Some(reason.into()))
    }

    pub fn mark_cancelled(&mut self) -> bool {
        self.finish(TransferStatus::Cancelled, None)
    }

    fn finish(&mut self, status: TransferStatus, error: Option<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = status;
        self.error = error;
        self.ended_at = Some(Utc::now());
        true
    }

    /// Percentage of parts uploaded
    pub fn progress(&self) -> f64 {
        if self.total_parts == 0 {
            return 0.0;
        }
        f64::from(self.completed_parts) / f64::from(self.total_parts) * 100.0
    }

    /// API projection
    pub fn to_info(&self) -> TransferInfo {
        TransferInfo {
            upload_id: self.id.to_string(),
            client_id: self.agent_id.to_string(),
            file_path: self.file_path.clone(),
            s3_key: self.key.clone(),
            bucket: self.bucket.clone(),
            file_size: self.file_size,
            chunk_size: self.chunk_size,
            status: self.status,
            progress: self.progress(),
            completed_parts: self.completed_parts,
            total_parts: self.total_parts,
            bytes_uploaded: self.bytes_uploaded,
            start_time: self.started_at,
            end_time: self.ended_at,
            error: self.error.clone(),
        }
    }
}
