//! fetchback: operator CLI for the coordinator
//!
//! Talks to the coordinator's HTTP API to trigger retrievals, follow
//! transfers and list connected agents, and issues agent tokens offline.

pub mod client;
pub mod commands;
pub mod output;

pub use client::{ClientError, CoordinatorClient};
