//! Reconnection supervisor
//!
//! ```text
//! Disconnected --> Connecting --dial ok--> Connected --drop--> Disconnected
//!                    |    ^
//!                    +----+ dial failed, wait min(base * 2^n, cap)
//! any --stop()--> ShuttingDown
//! ```
//!
//! The current state is published on a `watch` channel.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fb_core::config::AgentConfig;
use fb_core::ConnectionState;

use super::{run_session, ConnectionError, Dialer, ExponentialBackoff};
use crate::executor::Executor;

/// Keeps the agent connected until stopped
pub struct Supervisor<D: Dialer> {
    dialer: D,
    config: AgentConfig,
    executor: Arc<Executor>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

/// Control over a running supervisor
pub struct SupervisorHandle {
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl<D: Dialer> Supervisor<D> {
    pub fn new(
        dialer: D,
        config: AgentConfig,
        executor: Arc<Executor>,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            dialer,
            config,
            executor,
            state,
            shutdown,
        }
    }

    /// Start the reconnection loop
    pub fn spawn(self) -> SupervisorHandle {
        let state = self.state.subscribe();
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(self.run());
        SupervisorHandle {
            state,
            shutdown,
            task,
        }
    }

    async fn run(self) {
        let mut backoff = ExponentialBackoff::from_config(&self.config.backoff);

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            let dialed = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                dialed = self.dialer.dial() => dialed,
            };

            match dialed {
                Ok(stream) => {
                    backoff.reset();
                    self.set_state(ConnectionState::Connected);
                    tracing::info!("Connected to coordinator at {}", self.config.coordinator_url);

                    let end = run_session(
                        stream,
                        &self.config,
                        self.executor.clone(),
                        self.shutdown.clone(),
                    )
                    .await;

                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    tracing::warn!("Disconnected from coordinator: {:?}", end);
                    self.set_state(ConnectionState::Disconnected);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    match &e {
                        ConnectionError::AuthRejected { .. } => tracing::error!(
                            "{}; check the agent token. Retrying in {:?}",
                            e,
                            delay
                        ),
                        _ => tracing::warn!("Connection failed: {}. Retrying in {:?}", e, delay),
                    }

                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.set_state(ConnectionState::ShuttingDown);
        tracing::info!("Supervisor stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Connection state: {} -> {}", previous, state);
        }
    }
}

impl SupervisorHandle {
    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop reconnecting and close the channel
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the supervisor to finish
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!("Supervisor task failed: {}", e);
        }
    }
}
