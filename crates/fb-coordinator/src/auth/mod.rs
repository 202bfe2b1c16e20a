//! Agent authentication
//!
//! Agents may present a bearer credential when opening their channel. A
//! presented credential must validate and name the same agent as the
//! connection's `client_id`. Whether a credential is mandatory is a
//! deployment choice (`auth.require_token`).

mod jwt;

pub use jwt::{Claims, JwtValidator};

use chrono::{DateTime, Utc};
use thiserror::Error;

use fb_core::AgentId;

/// Authentication failures, all reported to the peer as 401
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Not a well-formed token
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Signature does not verify
    #[error("invalid token signature")]
    InvalidSignature,

    /// Past its expiry
    #[error("token has expired")]
    Expired,

    /// Before its not-before time
    #[error("token is not yet valid")]
    NotYetValid,

    /// Issued by someone else
    #[error("token was not issued by {expected:?}")]
    WrongIssuer { expected: String },

    /// Issued for another agent
    #[error("token is for agent {token}, connection claims {client}")]
    Mismatch { token: String, client: String },

    /// No token and one is required
    #[error("a token is required")]
    Missing,
}

/// Identity established by a valid credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedToken {
    pub agent_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Validates agent credentials
pub trait TokenValidator: Send + Sync {
    fn validate(&self, credential: &str) -> Result<ValidatedToken, AuthError>;
}

/// Apply the connection policy to a connecting agent.
///
/// Without a validator, presented tokens are not checked.
pub fn authorize(
    validator: Option<&dyn TokenValidator>,
    require_token: bool,
    agent_id: &AgentId,
    token: Option<&str>,
) -> Result<Option<ValidatedToken>, AuthError> {
    let token = match token.filter(|t| !t.is_empty()) {
        Some(token) => token,
        None if require_token => return Err(AuthError::Missing),
        None => return Ok(None),
    };

    let Some(validator) = validator else {
        tracing::debug!("Ignoring token from {}: no validator configured", agent_id);
        return Ok(None);
    };

    let validated = validator.validate(token)?;
    if validated.agent_id != agent_id.as_str() {
        return Err(AuthError::Mismatch {
            token: validated.agent_id,
            client: agent_id.to_string(),
        });
    }
    Ok(Some(validated))
}
