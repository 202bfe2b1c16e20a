//! HTTP handlers

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

use fb_core::api::{
    AgentStatusResponse, CancelResponse, ClientList, ClientSummary, HealthResponse, ServiceInfo,
    TransferInfo, TriggerRequest, TriggerResponse,
};
use fb_core::{AgentId, TransferId};

use super::error::{parse_json_body, ApiError};
use crate::state::CoordinatorState;

type AppState = State<Arc<CoordinatorState>>;

pub(crate) async fn service_info() -> Json<ServiceInfo> {
    let endpoints = [
        ("health", "GET /health"),
        ("websocket", "GET /ws/connect?client_id=<id>"),
        ("trigger_download", "POST /trigger-download/:client_id"),
        ("client_status", "GET /status/:client_id"),
        ("upload_status", "GET /uploads/:upload_id"),
        ("cancel_upload", "POST /uploads/:upload_id/cancel"),
        ("clients", "GET /clients"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect::<BTreeMap<_, _>>();

    Json(ServiceInfo {
        service: "fetchback-coordinator".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints,
    })
}

pub(crate) async fn health(State(state): AppState) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        time: Utc::now(),
        clients: state.registry.len().await,
    })
}

pub(crate) async fn trigger_download(
    State(state): AppState,
    Path(client_id): Path<String>,
    body: Bytes,
) -> Result<Json<TriggerResponse>, ApiError> {
    let agent_id = AgentId::new(client_id)?;
    let request: TriggerRequest = parse_json_body(&body)?;

    let outcome = state
        .transfers
        .trigger(&agent_id, request.file_path, request.metadata)
        .await?;

    Ok(Json(TriggerResponse {
        success: true,
        message: format!("download triggered for client {}", agent_id),
        upload_id: outcome.transfer_id.to_string(),
        s3_key: outcome.key,
    }))
}

pub(crate) async fn client_status(
    State(state): AppState,
    Path(client_id): Path<String>,
) -> Result<Json<AgentStatusResponse>, ApiError> {
    let agent_id = AgentId::new(client_id)?;
    let handle = state
        .registry
        .get(&agent_id)
        .await
        .filter(|h| !h.is_closed());
    let summary = state.transfers.agent_summary(&agent_id).await;

    Ok(Json(AgentStatusResponse {
        client_id: agent_id.to_string(),
        connected: handle.is_some(),
        connected_at: handle.as_ref().map(|h| h.connected_at()),
        last_heartbeat: handle.as_ref().map(|h| h.last_heartbeat()),
        last_activity: handle.as_ref().map(|h| h.last_activity()),
        current_upload: summary.current.map(|r| r.to_info()),
        total_uploads: summary.total,
        success_uploads: summary.succeeded,
        failed_uploads: summary.failed,
        metadata: handle.map(|h| h.metadata()).unwrap_or_default(),
    }))
}

pub(crate) async fn upload_status(
    State(state): AppState,
    Path(upload_id): Path<String>,
) -> Result<Json<TransferInfo>, ApiError> {
    let record = state
        .transfers
        .get(&TransferId::from(upload_id.as_str()))
        .await
        .ok_or_else(|| ApiError::NotFound(format!("upload {} not found", upload_id)))?;
    Ok(Json(record.to_info()))
}

pub(crate) async fn cancel_upload(
    State(state): AppState,
    Path(upload_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    state.transfers.cancel(&TransferId::from(upload_id.as_str())).await?;
    Ok(Json(CancelResponse {
        success: true,
        message: format!("cancellation requested for upload {}", upload_id),
    }))
}

pub(crate) async fn list_clients(State(state): AppState) -> Json<ClientList> {
    let clients: Vec<ClientSummary> = state
        .registry
        .handles()
        .await
        .into_iter()
        .map(|h| ClientSummary {
            client_id: h.agent_id().to_string(),
            connected_at: h.connected_at(),
            last_heartbeat: h.last_heartbeat(),
            last_activity: h.last_activity(),
            metadata: h.metadata(),
        })
        .collect();

    let count = clients.len();
    Json(ClientList { clients, count })
}
