//! Command executor
//!
//! Runs the coordinator's commands. `download_file` streams a local file to
//! the blob store through the ticket's presigned part URLs and answers with
//! exactly one terminal response; `cancel_upload` stops a running transfer
//! before its next part.

mod upload;

pub use upload::{plan_parts, PartPlan};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use fb_core::config::AgentConfig;
use fb_core::AgentId;
use fb_protocol::{
    Action, CancelUploadRequest, Command, CommandMessage, DownloadAccepted, DownloadFileRequest,
    HealthReport, Message, ResponseMessage, ResponseStatus,
};

use crate::channel::Outbound;
use upload::Upload;

/// Failures of a `download_file` command, each reported as one `error` response
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The ticket cannot carry the file
    #[error("invalid upload ticket: {0}")]
    InvalidTicket(String),

    /// A part upload failed
    #[error("part {part} upload failed: {reason}")]
    ChunkUploadFailed { part: u32, reason: String },

    /// Local file error
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),

    /// Stopped by `cancel_upload`
    #[error("upload cancelled")]
    Cancelled,

    /// The HTTP client could not be built
    #[error("http client: {0}")]
    Client(String),
}

/// Executes coordinator commands
pub struct Executor {
    agent_id: AgentId,
    default_file_path: String,
    upload_concurrency: usize,
    part_timeout: Duration,
    http: reqwest::Client,
    active: DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
}

impl Executor {
    pub fn new(
        config: &AgentConfig,
        agent_id: AgentId,
        shutdown: CancellationToken,
    ) -> Result<Self, ExecutorError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ExecutorError::Client(e.to_string()))?;
        Ok(Self {
            agent_id,
            default_file_path: config.default_file_path.clone(),
            upload_concurrency: config.upload_concurrency.max(1),
            part_timeout: config.part_timeout,
            http,
            active: DashMap::new(),
            shutdown,
        })
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Downloads currently running
    pub fn active_transfers(&self) -> usize {
        self.active.len()
    }

    /// Run one command, sending its responses to `out`
    pub async fn execute(&self, command: CommandMessage, out: &Outbound) {
        let command_id = command.message_id.clone();
        let action = command.action.clone();

        let parsed = match command.command() {
            Ok(parsed) => parsed,
            Err(e) => {
                let reason = match &action {
                    Action::Other(name) => format!("unknown command: {}", name),
                    _ => e.to_string(),
                };
                tracing::warn!("Rejecting command {}: {}", command_id, reason);
                send(out, ResponseMessage::error(command_id, action, reason)).await;
                return;
            }
        };

        match parsed {
            Command::DownloadFile(request) => self.download_file(&command_id, request, out).await,
            Command::CancelUpload(request) => self.cancel_upload(&command_id, request, out).await,
            Command::HealthCheck => self.health_check(&command_id, out).await,
        }
    }

    async fn download_file(&self, command_id: &str, request: DownloadFileRequest, out: &Outbound) {
        let ticket = request.upload_config;
        let upload_id = ticket.upload_id.clone();
        let file_path = if request.file_path.trim().is_empty() {
            self.default_file_path.clone()
        } else {
            request.file_path
        };
        tracing::info!("Starting upload {} of {}", upload_id, file_path);

        let accepted = DownloadAccepted {
            upload_id: upload_id.clone(),
            file_path: file_path.clone(),
            status: "starting".to_string(),
        };
        send(
            out,
            respond(ResponseStatus::InProgress, command_id, Action::DownloadFile, &accepted),
        )
        .await;

        let cancel = self.shutdown.child_token();
        self.active.insert(upload_id.clone(), cancel.clone());

        let result = Upload {
            http: &self.http,
            agent_id: &self.agent_id,
            path: PathBuf::from(&file_path),
            display_path: &file_path,
            ticket: &ticket,
            concurrency: self.upload_concurrency,
            part_timeout: self.part_timeout,
            cancel: &cancel,
            out,
        }
        .run()
        .await;

        self.active.remove(&upload_id);

        let response = match result {
            Ok(result) => {
                tracing::info!(
                    "Upload {} finished: {} bytes in {} parts ({} ms)",
                    upload_id,
                    result.file_size,
                    result.total_parts,
                    result.duration_ms
                );
                respond(ResponseStatus::Success, command_id, Action::DownloadFile, &result)
            }
            Err(ExecutorError::Cancelled) => {
                tracing::info!("Upload {} cancelled", upload_id);
                ResponseMessage::new(
                    ResponseStatus::Cancelled,
                    command_id,
                    Action::DownloadFile,
                    serde_json::json!({ "upload_id": upload_id }),
                )
            }
            Err(e) => {
                tracing::error!("Upload {} failed: {}", upload_id, e);
                ResponseMessage::error(command_id, Action::DownloadFile, e.to_string())
            }
        };
        send(out, response).await;
    }

    async fn cancel_upload(&self, command_id: &str, request: CancelUploadRequest, out: &Outbound) {
        match self.active.get(&request.upload_id) {
            Some(token) => {
                tracing::info!("Cancelling upload {}", request.upload_id);
                token.cancel();
            }
            None => tracing::debug!("No running upload {} to cancel", request.upload_id),
        }

        send(
            out,
            respond(ResponseStatus::Cancelled, command_id, Action::CancelUpload, &request),
        )
        .await;
    }

    async fn health_check(&self, command_id: &str, out: &Outbound) {
        let report = HealthReport {
            status: "healthy".to_string(),
            timestamp: Utc::now(),
            active_transfers: self.active_transfers(),
        };
        send(
            out,
            respond(ResponseStatus::Success, command_id, Action::HealthCheck, &report),
        )
        .await;
    }
}

/// Response with a typed payload, or an `error` response if it cannot be encoded
fn respond<T: Serialize>(
    status: ResponseStatus,
    command_id: &str,
    action: Action,
    payload: &T,
) -> ResponseMessage {
    ResponseMessage::with_payload(status, command_id, action.clone(), payload)
        .unwrap_or_else(|e| ResponseMessage::error(command_id, action, e.to_string()))
}

async fn send(out: &Outbound, response: ResponseMessage) {
    let status = response.status;
    if out.send(Message::Response(response)).await.is_err() {
        tracing::warn!("Channel closed, dropping {} response", status);
    }
}
