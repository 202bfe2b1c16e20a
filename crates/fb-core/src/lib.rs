//! fb-core: Core types and configuration for fetchback
//!
//! This crate provides identifiers, error types, configuration structures
//! and HTTP API models shared by the coordinator, agent, and CLI.

pub mod api;
pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use error::{ConfigError, FbError, IdError};
pub use types::{AgentId, ConnectionState, TransferId, TransferStatus};
