//! fb-coordinator: accepts agent channels and orchestrates transfers
//!
//! Agents dial in over a WebSocket and stay registered in the
//! [`ChannelRegistry`]. Operators trigger retrievals over HTTP; the
//! [`TransferOrchestrator`] hands the agent an upload ticket of presigned
//! part URLs and finalizes the blob store session once the agent reports
//! every part.

pub mod auth;
pub mod blob;
pub mod registry;
pub mod server;
pub mod state;
pub mod transfer;

pub use registry::ChannelRegistry;
pub use state::CoordinatorState;
pub use transfer::TransferOrchestrator;
