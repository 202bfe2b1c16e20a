//! AWS Signature Version 4 query-string presigning
//!
//! Every S3 request the coordinator makes, and every part URL it hands to an
//! agent, is authorized through the query string with an unsigned payload.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::{uri_encode, BlobError};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Access credentials
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    /// Read credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and
    /// `AWS_SESSION_TOKEN`
    pub fn from_env() -> Option<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        Some(Self {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A request to presign
#[derive(Debug, Clone)]
pub struct PresignRequest<'a> {
    pub method: &'a str,
    /// `host[:port]` exactly as it will be sent
    pub host: &'a str,
    /// URI-encoded absolute path
    pub path: &'a str,
    /// Operation query parameters, not yet encoded
    pub query: Vec<(String, String)>,
    /// Additional headers to sign (sent by the caller with the request)
    pub headers: Vec<(String, String)>,
    pub expires_in: Duration,
}

/// SigV4 presigner bound to one credential set and region
#[derive(Debug, Clone)]
pub struct Signer {
    credentials: Credentials,
    region: String,
}

impl Signer {
    pub fn new(credentials: Credentials, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
        }
    }

    /// Produce the full, signed query string for `request` as of `at`
    pub fn presign(&self, request: &PresignRequest<'_>, at: DateTime<Utc>) -> Result<String, BlobError> {
        let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
        let date = at.format("%Y%m%d").to_string();
        let scope = format!("{}/{}/{}/aws4_request", date, self.region, SERVICE);

        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        headers.push(("host".to_string(), request.host.to_string()));
        headers.sort();
        let signed_headers = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let mut query = request.query.clone();
        query.push(("X-Amz-Algorithm".into(), ALGORITHM.into()));
        query.push((
            "X-Amz-Credential".into(),
            format!("{}/{}", self.credentials.access_key_id, scope),
        ));
        query.push(("X-Amz-Date".into(), amz_date.clone()));
        query.push((
            "X-Amz-Expires".into(),
            request.expires_in.as_secs().to_string(),
        ));
        if let Some(token) = &self.credentials.session_token {
            query.push(("X-Amz-Security-Token".into(), token.clone()));
        }
        query.push(("X-Amz-SignedHeaders".into(), signed_headers.clone()));

        let mut encoded: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (uri_encode(k, false), uri_encode(v, false)))
            .collect();
        encoded.sort();
        let canonical_query = encoded
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method,
            request.path,
            canonical_query,
            canonical_headers,
            signed_headers,
            UNSIGNED_PAYLOAD
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key = self.signing_key(&date)?;
        let signature = hex::encode(hmac(&signing_key, string_to_sign.as_bytes())?);

        Ok(format!("{}&X-Amz-Signature={}", canonical_query, signature))
    }

    fn signing_key(&self, date: &str) -> Result<Vec<u8>, BlobError> {
        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac(secret.as_bytes(), date.as_bytes())?;
        let k_region = hmac(&k_date, self.region.as_bytes())?;
        let k_service = hmac(&k_region, SERVICE.as_bytes())?;
        hmac(&k_service, b"aws4_request")
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, BlobError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| BlobError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
