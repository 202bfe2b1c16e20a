//! Core error types for fetchback

use fb_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the fetchback ecosystem
#[derive(Error, Debug)]
pub enum FbError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Identifier error
    #[error("Invalid identifier: {0}")]
    Id(#[from] IdError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identifier validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Empty identifier
    #[error("identifier is empty")]
    Empty,

    /// Identifier longer than allowed
    #[error("identifier is {len} characters, maximum is {max}")]
    TooLong { len: usize, max: usize },

    /// Identifier contains characters that cannot appear in a blob key
    #[error("identifier contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
