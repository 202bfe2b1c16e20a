//! fb-agent: fetchback agent
//!
//! The agent runs next to the files it serves. It dials out to the
//! coordinator, keeps the channel up with exponential backoff, and uploads
//! files straight to the blob store when asked.

pub mod channel;
pub mod executor;

pub use channel::{ChannelConnector, Supervisor, SupervisorHandle};
pub use executor::{Executor, ExecutorError};
