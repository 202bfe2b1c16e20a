//! Duplex channel to the coordinator
//!
//! The agent dials out ([`ChannelConnector`]), then runs the channel's pumps
//! ([`run_session`]) until it drops. The [`supervisor`] wraps both in the
//! reconnection state machine.

mod connector;
mod pumps;
pub mod reconnect;
pub mod supervisor;

pub use connector::{ChannelConnector, Dialer, WsStream};
pub use pumps::{run_session, Outbound, SessionEnd, OUTBOUND_CAPACITY};
pub use reconnect::ExponentialBackoff;
pub use supervisor::{Supervisor, SupervisorHandle};

use std::time::Duration;
use thiserror::Error;

/// Failures to open the channel
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The coordinator refused the credential
    #[error("connection rejected by coordinator (HTTP {status})")]
    AuthRejected { status: u16 },

    /// The dial did not complete in time
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// Anything else: DNS, TCP, handshake
    #[error("{0}")]
    Transport(String),
}
