//! Token command implementation

use anyhow::{Context, Result};
use std::time::Duration;

use fb_coordinator::auth::JwtValidator;
use fb_core::AgentId;

/// Issue an agent token signed with the coordinator's secret.
///
/// Works offline; the coordinator only needs the same secret and issuer.
pub fn token_command(client_id: &str, secret: &str, issuer: &str, ttl: Duration) -> Result<String> {
    let agent_id = AgentId::new(client_id)
        .with_context(|| format!("invalid client id {:?}", client_id))?;
    if secret.is_empty() {
        anyhow::bail!("signing secret must not be empty");
    }
    JwtValidator::new(secret, issuer)
        .issue(agent_id.as_str(), ttl)
        .context("failed to sign token")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fb_coordinator::auth::TokenValidator;

    #[test]
    fn test_issued_token_validates() {
        let token = token_command("agent-1", "s3cret", "fetchback", Duration::from_secs(60)).unwrap();
        let validated = JwtValidator::new("s3cret", "fetchback")
            .validate(&token)
            .unwrap();
        assert_eq!(validated.agent_id.as_str(), "agent-1");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(token_command("", "s3cret", "fetchback", Duration::from_secs(60)).is_err());
        assert!(token_command("agent-1", "", "fetchback", Duration::from_secs(60)).is_err());
    }
}
