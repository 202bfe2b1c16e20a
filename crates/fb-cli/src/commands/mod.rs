//! CLI command implementations

mod agents;
mod health;
mod token;
mod transfers;

pub use agents::{list_command, status_command};
pub use health::health_command;
pub use token::token_command;
pub use transfers::{cancel_command, download_command, parse_metadata, upload_command};
