//! HS256 JSON Web Tokens

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AuthError, TokenValidator, ValidatedToken};

/// Token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub client_id: String,
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Issues and validates HS256 tokens bound to an agent id
pub struct JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
}

impl JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>, issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&issuer]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss"]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.as_ref()),
            decoding: DecodingKey::from_secret(secret.as_ref()),
            validation,
            issuer,
        }
    }

    /// Issue a token for `agent_id` valid for `ttl`
    pub fn issue(&self, agent_id: &str, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            client_id: agent_id.to_string(),
            sub: agent_id.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(ttl),
        };
        self.encode(&claims)
    }

    /// Sign arbitrary claims
    pub fn encode(&self, claims: &Claims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Malformed(e.to_string()))
    }

    /// Verify the signature, time window and issuer and return the claims
    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    AuthError::InvalidSignature
                }
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::ImmatureSignature => AuthError::NotYetValid,
                ErrorKind::InvalidIssuer => AuthError::WrongIssuer {
                    expected: self.issuer.clone(),
                },
                _ => AuthError::Malformed(e.to_string()),
            })
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, credential: &str) -> Result<ValidatedToken, AuthError> {
        let claims = self.decode(credential)?;
        let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0)
            .ok_or_else(|| AuthError::Malformed("exp out of range".into()))?;
        Ok(ValidatedToken {
            agent_id: claims.client_id,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> JwtValidator {
        JwtValidator::new("test-secret", "fetchback")
    }

    fn claims(now: i64) -> Claims {
        Claims {
            client_id: "agent-1".into(),
            sub: "agent-1".into(),
            iss: "fetchback".into(),
            iat: now,
            nbf: now,
            exp: now + 60,
        }
    }

    #[test]
    fn test_issue_and_validate() {
        let jwt = validator();
        let token = jwt.issue("agent-1", Duration::from_secs(3600)).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let validated = jwt.validate(&token).unwrap();
        assert_eq!(validated.agent_id, "agent-1");
        assert!(validated.expires_at > Utc::now());
    }

    #[test]
    fn test_wrong_secret() {
        let token = validator().issue("agent-1", Duration::from_secs(60)).unwrap();
        let other = JwtValidator::new("other-secret", "fetchback");
        assert_eq!(other.validate(&token), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn test_tampered_payload() {
        let jwt = validator();
        let token = jwt.issue("agent-1", Duration::from_secs(60)).unwrap();
        let forged = jwt.issue("agent-2", Duration::from_secs(60)).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let forged_parts: Vec<&str> = forged.split('.').collect();
        let spliced = format!("{}.{}.{}", parts[0], forged_parts[1], parts[2]);
        assert_eq!(jwt.validate(&spliced), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn test_other_algorithm_is_rejected() {
        let now = Utc::now().timestamp();
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS384),
            &claims(now),
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert_eq!(validator().validate(&token), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn test_time_window() {
        let jwt = validator();
        let now = Utc::now().timestamp();
        let expired = jwt
            .encode(&Claims {
                iat: now - 120,
                nbf: now - 120,
                exp: now - 60,
                ..claims(now)
            })
            .unwrap();
        assert_eq!(jwt.validate(&expired), Err(AuthError::Expired));

        let early = jwt
            .encode(&Claims {
                nbf: now + 600,
                exp: now + 1200,
                ..claims(now)
            })
            .unwrap();
        assert_eq!(jwt.validate(&early), Err(AuthError::NotYetValid));
    }

    #[test]
    fn test_required_claims() {
        #[derive(Serialize)]
        struct NoWindow<'a> {
            client_id: &'a str,
            iss: &'a str,
            exp: i64,
        }

        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &NoWindow {
                client_id: "agent-1",
                iss: "fetchback",
                exp: Utc::now().timestamp() + 60,
            },
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(matches!(
            validator().validate(&token),
            Err(AuthError::Malformed(_))
        ));
    }

    #[test]
    fn test_wrong_issuer() {
        let token = JwtValidator::new("test-secret", "someone-else")
            .issue("agent-1", Duration::from_secs(60))
            .unwrap();
        assert_eq!(
            validator().validate(&token),
            Err(AuthError::WrongIssuer {
                expected: "fetchback".into()
            })
        );
    }

    #[test]
    fn test_malformed() {
        let jwt = validator();
        assert!(matches!(jwt.validate("abc"), Err(AuthError::Malformed(_))));
        assert!(matches!(
            jwt.validate("a.b.c.d"),
            Err(AuthError::Malformed(_))
        ));
    }
}
