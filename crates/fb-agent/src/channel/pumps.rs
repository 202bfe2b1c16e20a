//! Channel pumps
//!
//! One writer task owns the sink and drains the outbound queue, so frames
//! never interleave. A heartbeat task pings the coordinator and ends the
//! session when nothing has been heard for `heartbeat_timeout`. The read
//! loop hands each command to the executor on its own tracked task.
//!
//! When the read side ends, the writer keeps flushing until the command
//! handlers have drained (or `drain_timeout` passes) so their terminal
//! responses still reach the coordinator.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use fb_core::config::AgentConfig;
use fb_protocol::{FrameCodec, Message, ResponseMessage, StatusMessage, SystemInfo};

use super::WsStream;
use crate::executor::Executor;

/// Capacity of the outbound queue
pub const OUTBOUND_CAPACITY: usize = 64;

/// Sender side of the outbound queue
pub type Outbound = mpsc::Sender<Message>;

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The coordinator closed the channel
    Closed,
    /// Reading from the transport failed
    ReadFailed(String),
    /// Writing to the transport failed
    WriteFailed(String),
    /// Nothing received for longer than the heartbeat timeout
    HeartbeatTimeout,
    /// The agent is stopping
    Shutdown,
}

/// Last time anything arrived from the coordinator
#[derive(Debug)]
struct Liveness(Mutex<Instant>);

impl Liveness {
    fn new() -> Self {
        Self(Mutex::new(Instant::now()))
    }

    fn touch(&self) {
        if let Ok(mut last) = self.0.lock() {
            *last = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.0
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or(Duration::ZERO)
    }
}

/// Run one connected session until it ends
pub async fn run_session(
    stream: WsStream,
    config: &AgentConfig,
    executor: Arc<Executor>,
    shutdown: CancellationToken,
) -> SessionEnd {
    let codec = FrameCodec::with_max_frame_size(config.max_message_size);
    let (sink, stream) = stream.split();
    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let session = shutdown.child_token();
    let flush = CancellationToken::new();
    let liveness = Arc::new(Liveness::new());

    let writer = tokio::spawn(write_loop(sink, rx, codec, flush.clone(), session.clone()));
    let heartbeat = tokio::spawn(heartbeat_loop(
        tx.clone(),
        liveness.clone(),
        config.heartbeat_interval,
        config.heartbeat_timeout,
        session.clone(),
    ));

    let mut announce = StatusMessage::new(executor.agent_id().as_str(), "idle");
    announce.system_info = Some(system_info());
    if tx.send(Message::Status(announce)).await.is_err() {
        tracing::debug!("Channel closed before announcement");
    }

    let tracker = TaskTracker::new();
    let mut end = read_loop(stream, codec, &tx, &liveness, &executor, &tracker, &session).await;

    tracker.close();
    if tokio::time::timeout(config.drain_timeout, tracker.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            "{} command handler(s) still running after {:?}",
            tracker.len(),
            config.drain_timeout
        );
    }
    session.cancel();
    flush.cancel();

    if let Ok(Some(timed_out)) = heartbeat.await {
        if end == SessionEnd::Shutdown && !shutdown.is_cancelled() {
            end = timed_out;
        }
    }
    match writer.await {
        Ok(Err(e)) if end == SessionEnd::Shutdown && !shutdown.is_cancelled() => {
            end = SessionEnd::WriteFailed(e);
        }
        Ok(_) => {}
        Err(e) => tracing::debug!("Writer task ended abnormally: {}", e),
    }
    end
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    codec: FrameCodec,
    tx: &Outbound,
    liveness: &Liveness,
    executor: &Arc<Executor>,
    tracker: &TaskTracker,
    session: &CancellationToken,
) -> SessionEnd {
    loop {
        let frame = tokio::select! {
            _ = session.cancelled() => return SessionEnd::Shutdown,
            frame = stream.next() => frame,
        };
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return SessionEnd::ReadFailed(e.to_string()),
            None => return SessionEnd::Closed,
        };
        liveness.touch();

        match frame {
            WsMessage::Text(text) => {
                tracing::trace!("<- {}", text.as_str());
                match codec.decode(text.as_str()) {
                    Ok(message) => dispatch(message, tx, executor, tracker).await,
                    Err(e) => tracing::warn!("Dropping frame from coordinator: {}", e),
                }
            }
            WsMessage::Close(frame) => {
                tracing::debug!("Coordinator closed the channel: {:?}", frame);
                return SessionEnd::Closed;
            }
            WsMessage::Binary(_) => tracing::warn!("Dropping binary frame from coordinator"),
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
        }
    }
}

async fn dispatch(message: Message, tx: &Outbound, executor: &Arc<Executor>, tracker: &TaskTracker) {
    match message {
        Message::Command(command) => {
            tracing::debug!("Received {} command {}", command.action, command.message_id);
            let executor = executor.clone();
            let tx = tx.clone();
            tracker.spawn(async move { executor.execute(command, &tx).await });
        }
        Message::Ping(_) => {
            if tx.send(Message::pong()).await.is_err() {
                tracing::debug!("Could not answer ping: channel closed");
            }
        }
        Message::Pong(_) => tracing::trace!("Pong from coordinator"),
        Message::Response(_) | Message::Status(_) => {
            tracing::warn!(
                "Ignoring unexpected {} frame from coordinator",
                message.message_type()
            );
        }
    }
}

/// Runs until `flush` is cancelled with nothing queued, or the queue closes.
/// A failed write cancels `session`.
async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut rx: mpsc::Receiver<Message>,
    codec: FrameCodec,
    flush: CancellationToken,
    session: CancellationToken,
) -> Result<(), String> {
    loop {
        let message = tokio::select! {
            biased;
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = flush.cancelled() => break,
        };

        let Some(text) = encode_frame(&codec, &message) else {
            continue;
        };
        tracing::trace!("-> {}", text);
        if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
            session.cancel();
            return Err(e.to_string());
        }
    }

    let _ = sink.send(WsMessage::Close(None)).await;
    Ok(())
}

/// Encode an outbound frame. A response too large for one frame is replaced
/// by an `error` response for the same command so the coordinator still
/// sees a terminal answer.
fn encode_frame(codec: &FrameCodec, message: &Message) -> Option<String> {
    let err = match codec.encode(message) {
        Ok(text) => return Some(text),
        Err(e) => e,
    };
    tracing::error!("Failed to encode {} frame: {}", message.message_type(), err);

    let Message::Response(response) = message else {
        return None;
    };
    let fallback = ResponseMessage::error(
        response.command_id.clone(),
        response.action.clone(),
        format!("{} response could not be sent: {}", response.status, err),
    );
    match codec.encode(&Message::Response(fallback)) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!("Dropping response to command {}: {}", response.command_id, e);
            None
        }
    }
}

/// Returns `Some(HeartbeatTimeout)` when it ended the session
async fn heartbeat_loop(
    tx: Outbound,
    liveness: Arc<Liveness>,
    interval: Duration,
    timeout: Duration,
    session: CancellationToken,
) -> Option<SessionEnd> {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = session.cancelled() => return None,
            _ = ticker.tick() => {
                let idle = liveness.idle_for();
                if idle >= timeout {
                    tracing::warn!("Coordinator silent for {:?}, dropping channel", idle);
                    session.cancel();
                    return Some(SessionEnd::HeartbeatTimeout);
                }
                match tx.try_send(Message::ping()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::debug!("Outbound queue full, skipping ping");
                    }
                    Err(TrySendError::Closed(_)) => return None,
                }
            }
        }
    }
}

fn system_info() -> SystemInfo {
    SystemInfo {
        hostname: gethostname::gethostname().to_string_lossy().into_owned(),
        os: std::env::consts::OS.to_string(),
        architecture: std::env::consts::ARCH.to_string(),
    }
}
