//! Transfer orchestrator
//!
//! Issues upload tickets to agents, folds their progress reports into
//! [`TransferRecord`]s and finalizes or aborts the blob store session.
//!
//! Each record sits behind its own `tokio::sync::Mutex`, held across the
//! finalization call, so a transfer reaches a terminal state at most once
//! and the blob session is never completed twice.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use fb_core::config::TransferConfig;
use fb_core::time::key_timestamp;
use fb_core::{AgentId, TransferId, TransferStatus};
use fb_protocol::{
    Action, CancelUploadRequest, Command, CommandMessage, DownloadFileRequest, DownloadFileResult,
    ResponseMessage, ResponseStatus, StatusMessage, UploadTicket,
};

use super::{TransferError, TransferRecord};
use crate::blob::{part_count, BlobStore, MultipartRequest};
use crate::registry::ChannelRegistry;

/// Result of a successful trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerOutcome {
    pub transfer_id: TransferId,
    /// Object key the file will be stored under
    pub key: String,
}

/// Per-agent transfer counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentTransferSummary {
    /// Most recent unfinished transfer
    pub current: Option<TransferRecord>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Drives transfers through their lifecycle
pub struct TransferOrchestrator {
    config: TransferConfig,
    registry: Arc<ChannelRegistry>,
    blob: Arc<dyn BlobStore>,
    records: DashMap<TransferId, Arc<Mutex<TransferRecord>>>,
}

impl TransferOrchestrator {
    pub fn new(
        config: TransferConfig,
        registry: Arc<ChannelRegistry>,
        blob: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            config,
            registry,
            blob,
            records: DashMap::new(),
        }
    }

    /// Start retrieving `file_path` (or the configured default) from an agent.
    ///
    /// Opens a blob session sized to the configured ceiling, records the
    /// transfer as `Pending` and sends the agent a `download_file` command
    /// whose message id is the transfer id.
    pub async fn trigger(
        &self,
        agent_id: &AgentId,
        file_path: Option<String>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<TriggerOutcome, TransferError> {
        if !self.registry.is_connected(agent_id).await {
            return Err(TransferError::NotConnected(agent_id.clone()));
        }

        let transfer_id = TransferId::generate();
        let file_path = file_path
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.config.default_file_path.clone());
        let metadata = metadata.unwrap_or_default();
        let key = object_key(&self.config.key_prefix, agent_id, Utc::now(), &file_path);

        let session = self
            .blob
            .initiate_multipart(MultipartRequest {
                key: key.clone(),
                size: self.config.ceiling_size,
                chunk_size: self.config.chunk_size,
                url_expiry: self.config.url_expiry,
                metadata: metadata.clone(),
            })
            .await?;

        let record = TransferRecord::new(
            transfer_id.clone(),
            agent_id.clone(),
            file_path.clone(),
            session.bucket.clone(),
            key.clone(),
            session.session_id.clone(),
            self.config.ceiling_size,
            self.config.chunk_size,
            session.part_urls.len() as u32,
            metadata.clone(),
        );
        let record = Arc::new(Mutex::new(record));
        self.records.insert(transfer_id.clone(), record.clone());

        let ticket = UploadTicket {
            upload_id: transfer_id.to_string(),
            bucket: session.bucket,
            key: key.clone(),
            region: self.blob.region().to_string(),
            chunk_size: self.config.chunk_size,
            presigned_urls: session.part_urls,
        };
        let command = CommandMessage::with_id(
            transfer_id.as_str(),
            Command::DownloadFile(DownloadFileRequest {
                file_path,
                upload_config: ticket,
                metadata,
            }),
        );

        let sent = match command {
            Ok(command) => self
                .registry
                .send_command(agent_id, command)
                .await
                .map_err(TransferError::from),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = sent {
            let mut record = record.lock().await;
            self.abort_session(&record).await;
            record.mark_failed(format!("command delivery failed: {}", e));
            tracing::warn!("Transfer {} to agent {} failed to start: {}", transfer_id, agent_id, e);
            return Err(e);
        }

        tracing::info!(
            "Transfer {} started: agent {} -> s3://{}",
            transfer_id,
            agent_id,
            key
        );
        Ok(TriggerOutcome { transfer_id, key })
    }

    /// Apply a response from an agent.
    ///
    /// `download_file` responses correlate through `command_id` (the
    /// transfer id); `cancel_upload` responses through their payload.
    pub async fn handle_response(
        &self,
        agent_id: &AgentId,
        response: ResponseMessage,
    ) -> Result<(), TransferError> {
        let transfer_id = match &response.action {
            Action::DownloadFile => TransferId::from(response.command_id.clone()),
            Action::CancelUpload => {
                let request: CancelUploadRequest = response.decode_payload()?;
                TransferId::from(request.upload_id)
            }
            Action::HealthCheck => {
                tracing::debug!("Health report from agent {}: {}", agent_id, response.payload);
                return Ok(());
            }
            Action::Other(name) => {
                tracing::debug!("Ignoring {} response from agent {}", name, agent_id);
                return Ok(());
            }
        };

        let record = self.record(&transfer_id)?;
        let mut record = record.lock().await;
        if record.agent_id != *agent_id {
            return Err(TransferError::InvalidReport(format!(
                "transfer {} belongs to agent {}, not {}",
                transfer_id, record.agent_id, agent_id
            )));
        }
        if record.is_terminal() {
            tracing::debug!(
                "Ignoring {} {} response for {} transfer {}",
                response.action,
                response.status,
                record.status,
                transfer_id
            );
            return Ok(());
        }

        if response.action == Action::CancelUpload {
            if response.status == ResponseStatus::Cancelled {
                self.abort_session(&record).await;
                record.mark_cancelled();
                tracing::info!("Transfer {} cancelled", transfer_id);
            } else {
                tracing::debug!(
                    "cancel_upload for {} answered {}",
                    transfer_id,
                    response.status
                );
            }
            return Ok(());
        }

        match response.status {
            ResponseStatus::InProgress => {
                if record.mark_in_progress() {
                    tracing::info!("Transfer {} in progress", transfer_id);
                }
                Ok(())
            }
            ResponseStatus::Success => self.finalize(&mut record, &response).await,
            ResponseStatus::Error => {
                let reason = response
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string());
                self.abort_session(&record).await;
                record.mark_failed(format!("agent reported: {}", reason));
                tracing::warn!("Transfer {} failed: agent reported: {}", transfer_id, reason);
                Ok(())
            }
            ResponseStatus::Cancelled => {
                self.abort_session(&record).await;
                record.mark_cancelled();
                tracing::info!("Transfer {} cancelled", transfer_id);
                Ok(())
            }
        }
    }

    /// Apply a progress report from an agent
    pub async fn handle_status(
        &self,
        agent_id: &AgentId,
        status: &StatusMessage,
    ) -> Result<(), TransferError> {
        let Some(progress) = &status.current_upload else {
            return Ok(());
        };

        let transfer_id = TransferId::from(progress.upload_id.clone());
        let record = self.record(&transfer_id)?;
        let mut record = record.lock().await;
        if record.agent_id != *agent_id {
            return Err(TransferError::InvalidReport(format!(
                "transfer {} belongs to agent {}, not {}",
                transfer_id, record.agent_id, agent_id
            )));
        }
        if record.is_terminal() {
            return Ok(());
        }

        record.mark_in_progress();
        record.merge_etags(&progress.etags);
        record.apply_counters(
            progress.file_size,
            progress.total_parts,
            progress.bytes_uploaded,
        );
        tracing::trace!(
            "Transfer {}: {}/{} parts, {} bytes",
            transfer_id,
            record.completed_parts,
            record.total_parts,
            record.bytes_uploaded
        );
        Ok(())
    }

    /// Ask the agent to stop a running transfer.
    ///
    /// The record is finalized when the agent answers `cancelled`.
    pub async fn cancel(&self, transfer_id: &TransferId) -> Result<(), TransferError> {
        let record = self.record(transfer_id)?;
        let agent_id = {
            let record = record.lock().await;
            if record.is_terminal() {
                return Err(TransferError::AlreadyTerminal {
                    id: transfer_id.to_string(),
                    status: record.status,
                });
            }
            record.agent_id.clone()
        };

        let command = CommandMessage::new(Command::CancelUpload(CancelUploadRequest {
            upload_id: transfer_id.to_string(),
        }))?;
        self.registry.send_command(&agent_id, command).await?;
        tracing::info!("Requested cancellation of transfer {}", transfer_id);
        Ok(())
    }

    /// Snapshot of one transfer
    pub async fn get(&self, transfer_id: &TransferId) -> Option<TransferRecord> {
        let record = self.records.get(transfer_id).map(|r| r.value().clone())?;
        let snapshot = record.lock().await.clone();
        Some(snapshot)
    }

    /// Snapshots of an agent's transfers, oldest first
    pub async fn list_for_agent(&self, agent_id: &AgentId) -> Vec<TransferRecord> {
        let records: Vec<Arc<Mutex<TransferRecord>>> =
            self.records.iter().map(|r| r.value().clone()).collect();

        let mut out = Vec::new();
        for record in records {
            let record = record.lock().await;
            if record.agent_id == *agent_id {
                out.push(record.clone());
            }
        }
        out.sort_by_key(|r| r.started_at);
        out
    }

    /// Counters and current transfer for an agent
    pub async fn agent_summary(&self, agent_id: &AgentId) -> AgentTransferSummary {
        let records = self.list_for_agent(agent_id).await;
        let current = records
            .iter()
            .rev()
            .find(|r| r.status == TransferStatus::InProgress)
            .or_else(|| {
                records
                    .iter()
                    .rev()
                    .find(|r| r.status == TransferStatus::Pending)
            })
            .cloned();

        AgentTransferSummary {
            current,
            total: records.len(),
            succeeded: records
                .iter()
                .filter(|r| r.status == TransferStatus::Completed)
                .count(),
            failed: records
                .iter()
                .filter(|r| r.status == TransferStatus::Failed)
                .count(),
        }
    }

    /// Number of transfers recorded
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn record(&self, transfer_id: &TransferId) -> Result<Arc<Mutex<TransferRecord>>, TransferError> {
        self.records
            .get(transfer_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))
    }

    /// Verify the reported digests and finalize the blob session
    async fn finalize(
        &self,
        record: &mut TransferRecord,
        response: &ResponseMessage,
    ) -> Result<(), TransferError> {
        let result: DownloadFileResult = match response.decode_payload() {
            Ok(result) => result,
            Err(e) => {
                self.abort_session(record).await;
                record.mark_failed(format!("invalid success report: {}", e));
                return Err(e.into());
            }
        };

        if !record.merge_etags(&result.etags) {
            self.abort_session(record).await;
            record.mark_failed("invalid success report: bad part numbers");
            return Err(TransferError::InvalidReport("bad part numbers".into()));
        }
        record.apply_counters(result.file_size, result.total_parts, result.bytes_uploaded);

        let required = part_count(result.file_size, record.chunk_size);
        let parts = match record.ordered_parts(required) {
            Ok(parts) => parts,
            Err(missing) => {
                let reason = format!("incomplete upload: missing parts {:?}", missing);
                self.abort_session(record).await;
                record.mark_failed(reason.clone());
                tracing::warn!("Transfer {} failed: {}", record.id, reason);
                return Err(TransferError::InvalidReport(reason));
            }
        };

        match self
            .blob
            .complete_multipart(&record.key, &record.session_id, &parts)
            .await
        {
            Ok(()) => {
                record.mark_completed();
                tracing::info!(
                    "Transfer {} completed: {} bytes in {} parts ({} ms on agent)",
                    record.id,
                    result.file_size,
                    parts.len(),
                    result.duration_ms
                );
                self.verify_object(record).await;
                Ok(())
            }
            Err(e) => {
                let error = TransferError::FinalizationFailed(e.to_string());
                record.mark_failed(error.to_string());
                tracing::error!("Transfer {}: {}", record.id, error);
                Err(error)
            }
        }
    }

    /// Compare the stored object with what the agent reported
    async fn verify_object(&self, record: &TransferRecord) {
        match self.blob.head_object(&record.key).await {
            Ok(info) if info.size != record.file_size => tracing::warn!(
                "Transfer {}: stored object is {} bytes, agent reported {}",
                record.id,
                info.size,
                record.file_size
            ),
            Ok(_) => {}
            Err(e) => tracing::debug!("Transfer {}: could not stat object: {}", record.id, e),
        }
    }

    async fn abort_session(&self, record: &TransferRecord) {
        if let Err(e) = self
            .blob
            .abort_multipart(&record.key, &record.session_id)
            .await
        {
            tracing::warn!(
                "Transfer {}: failed to abort blob session {}: {}",
                record.id,
                record.session_id,
                e
            );
        }
    }
}

/// `{prefix}/{agent}/{YYYYMMDD-HHMMSS}-{basename}`
pub fn object_key(prefix: &str, agent_id: &AgentId, at: DateTime<Utc>, file_path: &str) -> String {
    let name = file_path
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .unwrap_or("file");
    format!(
        "{}/{}/{}-{}",
        prefix.trim_matches('/'),
        agent_id,
        key_timestamp(at),
        name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobError, CompletedPart, MultipartSession, ObjectInfo};
    use crate::registry::{ChannelHandle, OUTBOUND_CAPACITY};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use fb_protocol::{EtagMap, Message, PartUrl, UploadProgress};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    const MB: u64 = 1024 * 1024;

    #[derive(Default)]
    struct RecordingStore {
        completions: std::sync::Mutex<Vec<Vec<CompletedPart>>>,
        aborts: std::sync::Mutex<Vec<String>>,
        fail_complete: AtomicBool,
    }

    impl RecordingStore {
        fn completions(&self) -> Vec<Vec<CompletedPart>> {
            self.completions.lock().unwrap().clone()
        }

        fn aborts(&self) -> Vec<String> {
            self.aborts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BlobStore for RecordingStore {
        fn bucket(&self) -> &str {
            "bucket"
        }

        fn region(&self) -> &str {
            "us-east-1"
        }

        async fn initiate_multipart(
            &self,
            request: MultipartRequest,
        ) -> Result<MultipartSession, BlobError> {
            Ok(MultipartSession {
                session_id: "session-1".into(),
                bucket: "bucket".into(),
                key: request.key.clone(),
                part_urls: (1..=request.part_count())
                    .map(|n| PartUrl {
                        part_number: n,
                        url: format!("http://blob.test/{}", n),
                        expires_at: None,
                    })
                    .collect(),
            })
        }

        async fn complete_multipart(
            &self,
            _key: &str,
            _session_id: &str,
            parts: &[CompletedPart],
        ) -> Result<(), BlobError> {
            self.completions.lock().unwrap().push(parts.to_vec());
            if self.fail_complete.load(Ordering::SeqCst) {
                return Err(BlobError::Status {
                    status: 500,
                    message: "InternalError".into(),
                });
            }
            Ok(())
        }

        async fn abort_multipart(&self, _key: &str, session_id: &str) -> Result<(), BlobError> {
            self.aborts.lock().unwrap().push(session_id.to_string());
            Ok(())
        }

        async fn head_object(&self, key: &str) -> Result<ObjectInfo, BlobError> {
            Err(BlobError::NotFound(key.to_string()))
        }
    }

    struct Fixture {
        orchestrator: TransferOrchestrator,
        store: Arc<RecordingStore>,
        registry: Arc<ChannelRegistry>,
        agent: AgentId,
        rx: mpsc::Receiver<Message>,
    }

    async fn fixture(config: TransferConfig) -> Fixture {
        let registry = Arc::new(ChannelRegistry::new());
        let store = Arc::new(RecordingStore::default());
        let agent = AgentId::new("agent-1").unwrap();
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        registry
            .register(Arc::new(ChannelHandle::new(
                agent.clone(),
                tx,
                CancellationToken::new(),
            )))
            .await;
        Fixture {
            orchestrator: TransferOrchestrator::new(config, registry.clone(), store.clone()),
            store,
            registry,
            agent,
            rx,
        }
    }

    fn sent_command(rx: &mut mpsc::Receiver<Message>) -> CommandMessage {
        match rx.try_recv() {
            Ok(Message::Command(cmd)) => cmd,
            other => panic!("Expected command, got {:?}", other),
        }
    }

    fn etags(parts: &[u32]) -> EtagMap {
        parts
            .iter()
            .map(|n| (n.to_string(), format!("\"etag-{}\"", n)))
            .collect()
    }

    fn success(id: &TransferId, file_size: u64, parts: &[u32]) -> ResponseMessage {
        ResponseMessage::with_payload(
            ResponseStatus::Success,
            id.as_str(),
            Action::DownloadFile,
            &DownloadFileResult {
                upload_id: id.to_string(),
                file_path: "/data/report.bin".into(),
                file_size,
                total_parts: parts.len() as u32,
                completed_parts: parts.len() as u32,
                bytes_uploaded: file_size,
                duration_ms: 10,
                s3_key: String::new(),
                etags: etags(parts),
            },
        )
        .unwrap()
    }

    fn progress(id: &TransferId, parts: &[u32]) -> StatusMessage {
        let mut status = StatusMessage::new("agent-1", "uploading");
        status.current_upload = Some(UploadProgress {
            upload_id: id.to_string(),
            file_path: "/data/report.bin".into(),
            file_size: 12 * MB,
            total_parts: 3,
            completed_parts: parts.len() as u32,
            bytes_uploaded: parts.len() as u64 * 5 * MB,
            progress: 0.0,
            etags: etags(parts),
        });
        status
    }

    #[test]
    fn test_object_key() {
        let agent = AgentId::new("agent-1").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        assert_eq!(
            object_key("uploads", &agent, at, "/var/log/app.log"),
            "uploads/agent-1/20240203-040506-app.log"
        );
        assert_eq!(
            object_key("/uploads/", &agent, at, "C:\\data\\x.bin"),
            "uploads/agent-1/20240203-040506-x.bin"
        );
        assert_eq!(
            object_key("uploads", &agent, at, "/"),
            "uploads/agent-1/20240203-040506-file"
        );
    }

    #[tokio::test]
    async fn test_trigger_requires_connection() {
        let f = fixture(TransferConfig::default()).await;
        let offline = AgentId::new("agent-2").unwrap();
        assert!(matches!(
            f.orchestrator.trigger(&offline, None, None).await,
            Err(TransferError::NotConnected(_))
        ));
        assert!(f.orchestrator.is_empty());
    }

    #[tokio::test]
    async fn test_trigger_sends_ticket() {
        let mut f = fixture(TransferConfig::default()).await;
        let outcome = f.orchestrator.trigger(&f.agent, None, None).await.unwrap();

        assert_eq!(outcome.transfer_id.as_str().len(), 32);
        assert!(outcome.key.starts_with("uploads/agent-1/"));
        assert!(outcome.key.ends_with("-test-file.bin"));

        let cmd = sent_command(&mut f.rx);
        assert_eq!(cmd.message_id, outcome.transfer_id.as_str());
        match cmd.command().unwrap() {
            Command::DownloadFile(req) => {
                assert_eq!(req.file_path, "/data/test-file.bin");
                assert_eq!(req.upload_config.upload_id, outcome.transfer_id.as_str());
                assert_eq!(req.upload_config.chunk_size, 5 * MB);
                assert_eq!(req.upload_config.part_count(), 20);
                assert!(req.upload_config.validate().is_ok());
            }
            other => panic!("Expected download_file, got {:?}", other),
        }

        let record = f.orchestrator.get(&outcome.transfer_id).await.unwrap();
        assert_eq!(record.status, TransferStatus::Pending);
        assert_eq!(record.total_parts, 20);
    }

    #[tokio::test]
    async fn test_twelve_megabyte_transfer_completes() {
        let mut f = fixture(TransferConfig::default()).await;
        let id = f
            .orchestrator
            .trigger(&f.agent, Some("/data/report.bin".into()), None)
            .await
            .unwrap()
            .transfer_id;
        sent_command(&mut f.rx);

        let accepted = ResponseMessage::new(
            ResponseStatus::InProgress,
            id.as_str(),
            Action::DownloadFile,
            serde_json::json!({ "upload_id": id.as_str(), "status": "starting" }),
        );
        f.orchestrator.handle_response(&f.agent, accepted).await.unwrap();
        assert_eq!(
            f.orchestrator.get(&id).await.unwrap().status,
            TransferStatus::InProgress
        );

        f.orchestrator
            .handle_status(&f.agent, &progress(&id, &[2]))
            .await
            .unwrap();
        let record = f.orchestrator.get(&id).await.unwrap();
        assert_eq!(record.completed_parts, 1);
        assert_eq!(record.completed_parts as usize, record.etags.len());
        assert_eq!(record.total_parts, 3);

        f.orchestrator
            .handle_response(&f.agent, success(&id, 12 * MB, &[3, 1, 2]))
            .await
            .unwrap();

        let record = f.orchestrator.get(&id).await.unwrap();
        assert_eq!(record.status, TransferStatus::Completed);
        assert_eq!(record.completed_parts, 3);
        assert_eq!(record.file_size, 12 * MB);

        let completions = f.store.completions();
        assert_eq!(completions.len(), 1);
        let numbers: Vec<u32> = completions[0].iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_finalization_sorts_numerically() {
        let config = TransferConfig {
            chunk_size: 1,
            ceiling_size: 12,
            ..Default::default()
        };
        let mut f = fixture(config).await;
        let id = f.orchestrator.trigger(&f.agent, None, None).await.unwrap().transfer_id;
        sent_command(&mut f.rx);

        f.orchestrator
            .handle_response(&f.agent, success(&id, 11, &[10, 2, 11, 1, 3, 9, 4, 8, 5, 7, 6]))
            .await
            .unwrap();

        let numbers: Vec<u32> = f.store.completions()[0]
            .iter()
            .map(|p| p.part_number)
            .collect();
        assert_eq!(numbers, (1..=11).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_duplicate_success_is_noop() {
        let mut f = fixture(TransferConfig::default()).await;
        let id = f.orchestrator.trigger(&f.agent, None, None).await.unwrap().transfer_id;
        sent_command(&mut f.rx);

        f.orchestrator
            .handle_response(&f.agent, success(&id, 12 * MB, &[1, 2, 3]))
            .await
            .unwrap();
        f.orchestrator
            .handle_response(&f.agent, success(&id, 12 * MB, &[1, 2, 3]))
            .await
            .unwrap();

        assert_eq!(f.store.completions().len(), 1);
        assert_eq!(
            f.orchestrator.get(&id).await.unwrap().status,
            TransferStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_concurrent_success_completes_once() {
        let mut f = fixture(TransferConfig::default()).await;
        let id = f.orchestrator.trigger(&f.agent, None, None).await.unwrap().transfer_id;
        sent_command(&mut f.rx);

        let (a, b) = tokio::join!(
            f.orchestrator
                .handle_response(&f.agent, success(&id, 12 * MB, &[1, 2, 3])),
            f.orchestrator
                .handle_response(&f.agent, success(&id, 12 * MB, &[1, 2, 3])),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(f.store.completions().len(), 1);
    }

    #[tokio::test]
    async fn test_agent_error_aborts() {
        let mut f = fixture(TransferConfig::default()).await;
        let id = f.orchestrator.trigger(&f.agent, None, None).await.unwrap().transfer_id;
        sent_command(&mut f.rx);

        f.orchestrator
            .handle_status(&f.agent, &progress(&id, &[1]))
            .await
            .unwrap();
        f.orchestrator
            .handle_response(
                &f.agent,
                ResponseMessage::error(
                    id.as_str(),
                    Action::DownloadFile,
                    "part 2 upload failed: status 500",
                ),
            )
            .await
            .unwrap();

        let record = f.orchestrator.get(&id).await.unwrap();
        assert_eq!(record.status, TransferStatus::Failed);
        assert_eq!(
            record.error.as_deref(),
            Some("agent reported: part 2 upload failed: status 500")
        );
        assert_eq!(f.store.aborts(), vec!["session-1".to_string()]);
        assert!(f.store.completions().is_empty());

        // Late progress is ignored once terminal
        f.orchestrator
            .handle_status(&f.agent, &progress(&id, &[1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(f.orchestrator.get(&id).await.unwrap().completed_parts, 1);
    }

    #[tokio::test]
    async fn test_incomplete_success_fails() {
        let mut f = fixture(TransferConfig::default()).await;
        let id = f.orchestrator.trigger(&f.agent, None, None).await.unwrap().transfer_id;
        sent_command(&mut f.rx);

        let result = f
            .orchestrator
            .handle_response(&f.agent, success(&id, 12 * MB, &[1, 3]))
            .await;
        assert!(matches!(result, Err(TransferError::InvalidReport(_))));

        let record = f.orchestrator.get(&id).await.unwrap();
        assert_eq!(record.status, TransferStatus::Failed);
        assert!(record.error.unwrap().contains("missing parts [2]"));
        assert!(f.store.completions().is_empty());
        assert_eq!(f.store.aborts().len(), 1);
    }

    #[tokio::test]
    async fn test_finalization_failure_is_distinct() {
        let mut f = fixture(TransferConfig::default()).await;
        f.store.fail_complete.store(true, Ordering::SeqCst);
        let id = f.orchestrator.trigger(&f.agent, None, None).await.unwrap().transfer_id;
        sent_command(&mut f.rx);

        let result = f
            .orchestrator
            .handle_response(&f.agent, success(&id, 12 * MB, &[1, 2, 3]))
            .await;
        assert!(matches!(result, Err(TransferError::FinalizationFailed(_))));

        let record = f.orchestrator.get(&id).await.unwrap();
        assert_eq!(record.status, TransferStatus::Failed);
        assert!(record
            .error
            .unwrap()
            .starts_with("finalization failed (data uploaded but not finalized): "));
        assert!(f.store.aborts().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_flow() {
        let mut f = fixture(TransferConfig::default()).await;
        let id = f.orchestrator.trigger(&f.agent, None, None).await.unwrap().transfer_id;
        sent_command(&mut f.rx);

        f.orchestrator.cancel(&id).await.unwrap();
        let cmd = sent_command(&mut f.rx);
        match cmd.command().unwrap() {
            Command::CancelUpload(req) => assert_eq!(req.upload_id, id.as_str()),
            other => panic!("Expected cancel_upload, got {:?}", other),
        }

        let ack = ResponseMessage::new(
            ResponseStatus::Cancelled,
            cmd.message_id.clone(),
            Action::CancelUpload,
            serde_json::json!({ "upload_id": id.as_str(), "status": "cancelled" }),
        );
        f.orchestrator.handle_response(&f.agent, ack).await.unwrap();

        let record = f.orchestrator.get(&id).await.unwrap();
        assert_eq!(record.status, TransferStatus::Cancelled);
        assert_eq!(f.store.aborts().len(), 1);

        // The executor's own cancelled response arrives afterwards and is ignored
        let late = ResponseMessage::new(
            ResponseStatus::Cancelled,
            id.as_str(),
            Action::DownloadFile,
            serde_json::Value::Null,
        );
        f.orchestrator.handle_response(&f.agent, late).await.unwrap();
        assert_eq!(f.store.aborts().len(), 1);

        assert!(matches!(
            f.orchestrator.cancel(&id).await,
            Err(TransferError::AlreadyTerminal { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_offline_agent() {
        let mut f = fixture(TransferConfig::default()).await;
        let id = f.orchestrator.trigger(&f.agent, None, None).await.unwrap().transfer_id;
        sent_command(&mut f.rx);

        f.registry.unregister(&f.agent).await;
        assert!(matches!(
            f.orchestrator.cancel(&id).await,
            Err(TransferError::NotConnected(_))
        ));
        // Without a response the record stays where it was
        assert_eq!(
            f.orchestrator.get(&id).await.unwrap().status,
            TransferStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_reports_from_other_agents_are_rejected() {
        let mut f = fixture(TransferConfig::default()).await;
        let id = f.orchestrator.trigger(&f.agent, None, None).await.unwrap().transfer_id;
        sent_command(&mut f.rx);

        let intruder = AgentId::new("agent-2").unwrap();
        assert!(matches!(
            f.orchestrator
                .handle_response(&intruder, success(&id, 12 * MB, &[1, 2, 3]))
                .await,
            Err(TransferError::InvalidReport(_))
        ));
        assert!(f.store.completions().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_transfer() {
        let f = fixture(TransferConfig::default()).await;
        let id = TransferId::from("nope");
        assert!(matches!(
            f.orchestrator
                .handle_response(&f.agent, success(&id, 1, &[1]))
                .await,
            Err(TransferError::NotFound(_))
        ));
        assert!(matches!(
            f.orchestrator.cancel(&id).await,
            Err(TransferError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_agent_summary() {
        let mut f = fixture(TransferConfig::default()).await;
        let first = f.orchestrator.trigger(&f.agent, None, None).await.unwrap().transfer_id;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = f.orchestrator.trigger(&f.agent, None, None).await.unwrap().transfer_id;
        sent_command(&mut f.rx);
        sent_command(&mut f.rx);

        f.orchestrator
            .handle_response(&f.agent, success(&first, 12 * MB, &[1, 2, 3]))
            .await
            .unwrap();
        f.orchestrator
            .handle_status(&f.agent, &progress(&second, &[1]))
            .await
            .unwrap();

        let summary = f.orchestrator.agent_summary(&f.agent).await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.current.map(|r| r.id), Some(second));

        let other = f
            .orchestrator
            .agent_summary(&AgentId::new("agent-9").unwrap())
            .await;
        assert_eq!(other, AgentTransferSummary::default());
    }
}
