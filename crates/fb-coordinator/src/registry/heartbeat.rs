//! Heartbeat supervision for agent channels
//!
//! Every registered channel gets a task that enqueues a `ping` each
//! interval, skipping it when the outbound queue is full. Any inbound frame
//! counts as a sign of life; a channel silent for longer than the timeout is
//! unregistered.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use fb_protocol::Message;

use super::{ChannelHandle, ChannelRegistry, RegistryError};

/// Spawn the heartbeat task for a channel.
///
/// The task ends when the channel closes or is found dead.
pub fn spawn_heartbeat(
    registry: Arc<ChannelRegistry>,
    handle: Arc<ChannelHandle>,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = handle.closed() => break,
                _ = ticker.tick() => {
                    let idle = handle.idle_for();
                    if idle >= timeout {
                        tracing::warn!(
                            "Agent {} silent for {:?}, closing channel",
                            handle.agent_id(),
                            idle
                        );
                        registry
                            .unregister_connection(handle.agent_id(), handle.connection_id())
                            .await;
                        handle.close();
                        break;
                    }

                    tracing::trace!("Pinging agent {}", handle.agent_id());
                    match handle.try_send(Message::ping()) {
                        Ok(()) => {}
                        Err(RegistryError::QueueFull(_)) => {
                            tracing::debug!(
                                "Outbound queue to agent {} full, skipping ping",
                                handle.agent_id()
                            );
                        }
                        Err(_) => break,
                    }
                }
            }
        }
    })
}
