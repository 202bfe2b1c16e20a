//! Agent channel endpoint
//!
//! `GET /ws/connect?client_id=<id>[&token=<credential>]` upgrades to a
//! WebSocket carrying one JSON text frame per protocol message. Every
//! inbound frame is handled on its own tracked task so a slow handler never
//! holds up the read loop; all outbound frames go through the handle's queue
//! and a single writer task.

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use fb_core::AgentId;
use fb_protocol::{FrameCodec, Message};

use super::error::ApiError;
use crate::auth;
use crate::registry::heartbeat::spawn_heartbeat;
use crate::registry::{ChannelHandle, OUTBOUND_CAPACITY};
use crate::state::CoordinatorState;

/// WebSocket close code for a normal shutdown
const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ConnectParams {
    client_id: Option<String>,
    token: Option<String>,
}

/// Validate the connecting agent, then upgrade
pub(crate) async fn connect(
    State(state): State<Arc<CoordinatorState>>,
    Query(params): Query<ConnectParams>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let client_id = params
        .client_id
        .ok_or_else(|| ApiError::BadRequest("client_id query parameter is required".into()))?;
    let agent_id = AgentId::new(client_id)?;

    let token = params.token.or_else(|| bearer_token(&headers));
    auth::authorize(
        state.validator.as_deref(),
        state.config.auth.require_token,
        &agent_id,
        token.as_deref(),
    )
    .map_err(|e| {
        tracing::warn!("Rejected connection from agent {}: {}", agent_id, e);
        ApiError::from(e)
    })?;

    let peer = peer.map(|ConnectInfo(addr)| addr);
    let max = state.config.max_message_size;
    Ok(ws
        .max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| run_channel(state, agent_id, peer, socket))
        .into_response())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}

/// Serve one agent channel until it closes
async fn run_channel(
    state: Arc<CoordinatorState>,
    agent_id: AgentId,
    peer: Option<SocketAddr>,
    socket: WebSocket,
) {
    let (sink, stream) = socket.split();
    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let cancel = state.shutdown.child_token();
    let handle = Arc::new(ChannelHandle::new(agent_id.clone(), tx, cancel.clone()));
    if let Some(peer) = peer {
        handle.set_metadata("peer_addr", peer.to_string());
    }

    if let Some(old) = state.registry.register(handle.clone()).await {
        tracing::info!(
            "Agent {} reconnected, superseding connection {}",
            agent_id,
            old.connection_id()
        );
    }
    tracing::info!(
        "Agent {} connected (connection {}, peer {})",
        agent_id,
        handle.connection_id(),
        peer.map(|p| p.to_string()).unwrap_or_else(|| "unknown".into())
    );

    let codec = state.codec();
    let writer = tokio::spawn(write_loop(sink, rx, codec, cancel.clone()));
    let heartbeat = spawn_heartbeat(
        state.registry.clone(),
        handle.clone(),
        state.config.heartbeat_interval,
        state.config.heartbeat_timeout,
    );

    read_loop(&state, &handle, stream, codec).await;

    handle.close();
    state
        .registry
        .unregister_connection(&agent_id, handle.connection_id())
        .await;
    heartbeat.abort();
    if let Err(e) = writer.await {
        tracing::debug!("Writer task for agent {} ended abnormally: {}", agent_id, e);
    }
    tracing::info!(
        "Agent {} disconnected (connection {})",
        agent_id,
        handle.connection_id()
    );
}

/// Drain the outbound queue onto the socket
async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<Message>,
    codec: FrameCodec,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let text = match codec.encode(&message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode {} frame: {}", message.message_type(), e);
                continue;
            }
        };
        tracing::trace!("-> {}", text);
        if let Err(e) = sink.send(WsMessage::Text(text)).await {
            tracing::debug!("Channel write failed: {}", e);
            cancel.cancel();
            return;
        }
    }

    let close = WsMessage::Close(Some(CloseFrame {
        code: CLOSE_NORMAL,
        reason: "closing".into(),
    }));
    let _ = sink.send(close).await;
}

async fn read_loop(
    state: &Arc<CoordinatorState>,
    handle: &Arc<ChannelHandle>,
    mut stream: SplitStream<WebSocket>,
    codec: FrameCodec,
) {
    let tracker = TaskTracker::new();

    loop {
        let frame = tokio::select! {
            _ = handle.closed() => break,
            frame = stream.next() => frame,
        };
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::debug!("Channel read from agent {} failed: {}", handle.agent_id(), e);
                break;
            }
            None => break,
        };
        handle.touch_activity();

        match frame {
            WsMessage::Text(text) => {
                tracing::trace!("<- {}", text);
                let message = match codec.decode(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("Dropping frame from agent {}: {}", handle.agent_id(), e);
                        continue;
                    }
                };
                let state = state.clone();
                let handle = handle.clone();
                tracker.spawn(async move { dispatch(&state, &handle, message).await });
            }
            WsMessage::Binary(_) => {
                tracing::warn!("Dropping binary frame from agent {}", handle.agent_id());
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => handle.touch_heartbeat(),
            WsMessage::Close(_) => break,
        }
    }

    tracker.close();
    let drain = state.config.drain_timeout;
    if tokio::time::timeout(drain, tracker.wait()).await.is_err() {
        tracing::warn!(
            "{} frame handler(s) for agent {} still running after {:?}",
            tracker.len(),
            handle.agent_id(),
            drain
        );
    }
}

async fn dispatch(state: &CoordinatorState, handle: &ChannelHandle, message: Message) {
    let agent_id = handle.agent_id();
    match message {
        Message::Ping(_) => {
            handle.touch_heartbeat();
            if let Err(e) = handle.send(Message::pong()).await {
                tracing::debug!("Could not answer ping from {}: {}", agent_id, e);
            }
        }
        Message::Pong(_) => handle.touch_heartbeat(),
        Message::Response(response) => {
            tracing::debug!(
                "Agent {} answered {} {} with {}",
                agent_id,
                response.action,
                response.command_id,
                response.status
            );
            if let Err(e) = state.transfers.handle_response(agent_id, response).await {
                tracing::warn!("Response from agent {} not applied: {}", agent_id, e);
            }
        }
        Message::Status(status) => {
            handle.set_metadata("status", status.status.clone());
            if let Some(info) = &status.system_info {
                handle.set_metadata("hostname", info.hostname.clone());
                handle.set_metadata("os", info.os.clone());
                handle.set_metadata("architecture", info.architecture.clone());
            }
            if let Err(e) = state.transfers.handle_status(agent_id, &status).await {
                tracing::warn!("Status from agent {} not applied: {}", agent_id, e);
            }
        }
        Message::Command(command) => {
            tracing::warn!(
                "Ignoring {} command {} sent by agent {}",
                command.action,
                command.message_id,
                agent_id
            );
        }
    }
}
