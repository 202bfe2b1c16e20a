//! S3 (and S3-compatible) blob store over presigned requests

use async_trait::async_trait;
use chrono::Utc;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, Method, Url};
use std::time::Duration;

use fb_core::config::BlobConfig;
use fb_protocol::PartUrl;

use super::sigv4::{Credentials, PresignRequest, Signer};
use super::{
    uri_encode, BlobError, BlobStore, CompletedPart, MultipartRequest, MultipartSession,
    ObjectInfo,
};

/// Lifetime of the presigned URLs used for the coordinator's own requests
const CONTROL_URL_EXPIRY: Duration = Duration::from_secs(300);

/// Blob store backed by S3 or an S3-compatible service
pub struct S3BlobStore {
    client: Client,
    signer: Signer,
    bucket: String,
    region: String,
    /// Custom endpoint; when set, path-style addressing is used
    endpoint: Option<Url>,
}

impl S3BlobStore {
    /// Create a store from configuration, reading credentials from the
    /// environment when the configuration has none
    pub fn from_config(config: &BlobConfig) -> Result<Self, BlobError> {
        let credentials = match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Credentials {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                session_token: config.session_token.clone(),
            },
            _ => Credentials::from_env().ok_or_else(|| {
                BlobError::Signing(
                    "no credentials configured and AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY unset"
                        .into(),
                )
            })?,
        };

        let endpoint = config
            .endpoint
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| BlobError::Signing(format!("invalid endpoint: {}", e)))?;

        Ok(Self::new(
            credentials,
            config.bucket.clone(),
            config.region.clone(),
            endpoint,
        ))
    }

    pub fn new(
        credentials: Credentials,
        bucket: impl Into<String>,
        region: impl Into<String>,
        endpoint: Option<Url>,
    ) -> Self {
        let region = region.into();
        Self {
            client: Client::new(),
            signer: Signer::new(credentials, region.clone()),
            bucket: bucket.into(),
            region,
            endpoint,
        }
    }

    /// Scheme, `host[:port]` and encoded path for an object key
    fn locate(&self, key: &str) -> Result<(String, String, String), BlobError> {
        let encoded_key = uri_encode(key, true);
        match &self.endpoint {
            Some(endpoint) => {
                let host = endpoint
                    .host_str()
                    .ok_or_else(|| BlobError::Signing("endpoint has no host".into()))?;
                let host = match endpoint.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                };
                Ok((
                    endpoint.scheme().to_string(),
                    host,
                    format!("/{}/{}", uri_encode(&self.bucket, false), encoded_key),
                ))
            }
            None => Ok((
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
                format!("/{}", encoded_key),
            )),
        }
    }

    /// Build a presigned URL for an operation on `key`
    fn presigned_url(
        &self,
        method: &str,
        key: &str,
        query: Vec<(String, String)>,
        headers: Vec<(String, String)>,
        expires_in: Duration,
    ) -> Result<String, BlobError> {
        let (scheme, host, path) = self.locate(key)?;
        let request = PresignRequest {
            method,
            host: &host,
            path: &path,
            query,
            headers,
            expires_in,
        };
        let signed = self.signer.presign(&request, Utc::now())?;
        Ok(format!("{}://{}{}?{}", scheme, host, path, signed))
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        headers: Vec<(String, String)>,
        body: Option<String>,
    ) -> Result<reqwest::Response, BlobError> {
        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/xml")
                .body(body);
        }
        Ok(request.send().await?)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn initiate_multipart(
        &self,
        request: MultipartRequest,
    ) -> Result<MultipartSession, BlobError> {
        let mut meta_headers: Vec<(String, String)> = request
            .metadata
            .iter()
            .map(|(k, v)| (format!("x-amz-meta-{}", k.to_ascii_lowercase()), v.clone()))
            .collect();
        meta_headers.sort();

        let url = self.presigned_url(
            "POST",
            &request.key,
            vec![("uploads".into(), String::new())],
            meta_headers.clone(),
            CONTROL_URL_EXPIRY,
        )?;
        let response = self.send(Method::POST, url, meta_headers, None).await?;
        let body = checked_body(response).await?;
        let session_id = xml_tag(&body, "UploadId").ok_or(BlobError::MissingField("UploadId"))?;

        let expires_at = Utc::now()
            + chrono::Duration::from_std(request.url_expiry)
                .map_err(|e| BlobError::Signing(e.to_string()))?;
        let part_urls = (1..=request.part_count())
            .map(|part_number| {
                let url = self.presigned_url(
                    "PUT",
                    &request.key,
                    vec![
                        ("partNumber".into(), part_number.to_string()),
                        ("uploadId".into(), session_id.clone()),
                    ],
                    vec![],
                    request.url_expiry,
                )?;
                Ok(PartUrl {
                    part_number,
                    url,
                    expires_at: Some(expires_at),
                })
            })
            .collect::<Result<Vec<_>, BlobError>>()?;

        tracing::debug!(
            "Opened multipart session for s3://{}/{} with {} part URLs",
            self.bucket,
            request.key,
            part_urls.len()
        );

        Ok(MultipartSession {
            session_id,
            bucket: self.bucket.clone(),
            key: request.key,
            part_urls,
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), BlobError> {
        if parts.is_empty() {
            return Err(BlobError::InvalidParts("no parts".into()));
        }

        let url = self.presigned_url(
            "POST",
            key,
            vec![("uploadId".into(), session_id.to_string())],
            vec![],
            CONTROL_URL_EXPIRY,
        )?;
        let response = self
            .send(Method::POST, url, vec![], Some(completion_body(parts)))
            .await?;
        let body = checked_body(response).await?;

        // S3 can report a failed completion inside a 200 reply
        if root_element(&body).as_deref() == Some("Error") {
            return Err(BlobError::Status {
                status: 200,
                message: error_message(&body),
            });
        }
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, session_id: &str) -> Result<(), BlobError> {
        let url = self.presigned_url(
            "DELETE",
            key,
            vec![("uploadId".into(), session_id.to_string())],
            vec![],
            CONTROL_URL_EXPIRY,
        )?;
        let response = self.send(Method::DELETE, url, vec![], None).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BlobError::NotFound(format!("upload {}", session_id)));
        }
        checked_body(response).await?;
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<ObjectInfo, BlobError> {
        let url = self.presigned_url("HEAD", key, vec![], vec![], CONTROL_URL_EXPIRY)?;
        let response = self.send(Method::HEAD, url, vec![], None).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BlobError::NotFound(key.to_string()));
        }
        if !response.status().is_success() {
            return Err(BlobError::Status {
                status: response.status().as_u16(),
                message: "HEAD failed".into(),
            });
        }

        let headers = response.headers();
        let size = headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or(BlobError::MissingField("Content-Length"))?;
        let etag = headers
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Ok(ObjectInfo {
            key: key.to_string(),
            size,
            etag,
        })
    }
}

/// Read a reply body, turning non-2xx replies into errors
async fn checked_body(response: reqwest::Response) -> Result<String, BlobError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(BlobError::Status {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }
    Ok(body)
}

fn error_message(body: &str) -> String {
    match (xml_tag(body, "Code"), xml_tag(body, "Message")) {
        (Some(code), Some(message)) => format!("{}: {}", code, message),
        (Some(code), None) => code,
        _ => body.chars().take(200).collect(),
    }
}

/// Text of the first element named `tag`
fn xml_tag(body: &str, tag: &str) -> Option<String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut text: Option<String> = None;
    loop {
        match reader.read_event().ok()? {
            Event::Start(e) if text.is_none() && e.local_name().as_ref() == tag.as_bytes() => {
                text = Some(String::new());
            }
            Event::Empty(e) if text.is_none() && e.local_name().as_ref() == tag.as_bytes() => {
                return Some(String::new());
            }
            Event::Text(t) => {
                if let Some(text) = text.as_mut() {
                    text.push_str(&t.unescape().ok()?);
                }
            }
            Event::End(e) if text.is_some() && e.local_name().as_ref() == tag.as_bytes() => {
                return text;
            }
            Event::Eof => return None,
            _ => {}
        }
    }
}

/// Name of the document's root element
fn root_element(body: &str) -> Option<String> {
    let mut reader = Reader::from_str(body);
    loop {
        match reader.read_event().ok()? {
            Event::Start(e) | Event::Empty(e) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Event::Eof => return None,
            _ => {}
        }
    }
}

fn completion_body(parts: &[CompletedPart]) -> String {
    let mut body = String::from("<CompleteMultipartUpload>");
    for part in parts {
        body.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
            part.part_number,
            escape(part.etag.as_str())
        ));
    }
    body.push_str("</CompleteMultipartUpload>");
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(endpoint: Option<&str>) -> S3BlobStore {
        S3BlobStore::new(
            Credentials {
                access_key_id: "AKID".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            },
            "my-bucket",
            "eu-west-1",
            endpoint.map(|e| Url::parse(e).unwrap()),
        )
    }

    #[test]
    fn test_virtual_hosted_location() {
        let (scheme, host, path) = store(None).locate("uploads/a b/x.bin").unwrap();
        assert_eq!(scheme, "https");
        assert_eq!(host, "my-bucket.s3.eu-west-1.amazonaws.com");
        assert_eq!(path, "/uploads/a%20b/x.bin");
    }

    #[test]
    fn test_path_style_location() {
        let (scheme, host, path) = store(Some("http://127.0.0.1:9000"))
            .locate("uploads/x.bin")
            .unwrap();
        assert_eq!(scheme, "http");
        assert_eq!(host, "127.0.0.1:9000");
        assert_eq!(path, "/my-bucket/uploads/x.bin");
    }

    #[test]
    fn test_part_url_shape() {
        let url = store(Some("http://127.0.0.1:9000"))
            .presigned_url(
                "PUT",
                "uploads/x.bin",
                vec![
                    ("partNumber".into(), "3".into()),
                    ("uploadId".into(), "u-1".into()),
                ],
                vec![],
                Duration::from_secs(900),
            )
            .unwrap();
        assert!(url.starts_with("http://127.0.0.1:9000/my-bucket/uploads/x.bin?"));
        assert!(url.contains("partNumber=3"));
        assert!(url.contains("uploadId=u-1"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[test]
    fn test_completion_body_escapes_etags() {
        let body = completion_body(&[
            CompletedPart {
                part_number: 1,
                etag: "\"abc\"".into(),
            },
            CompletedPart {
                part_number: 2,
                etag: "\"def\"".into(),
            },
        ]);
        assert_eq!(
            body,
            "<CompleteMultipartUpload>\
             <Part><PartNumber>1</PartNumber><ETag>&quot;abc&quot;</ETag></Part>\
             <Part><PartNumber>2</PartNumber><ETag>&quot;def&quot;</ETag></Part>\
             </CompleteMultipartUpload>"
        );
    }

    #[test]
    fn test_xml_helpers() {
        let body = "<InitiateMultipartUploadResult><Bucket>b</Bucket>\
                    <UploadId>VXBsb2Fk&amp;1</UploadId></InitiateMultipartUploadResult>";
        assert_eq!(xml_tag(body, "UploadId").as_deref(), Some("VXBsb2Fk&1"));
        assert_eq!(xml_tag(body, "Missing"), None);

        let error = "<Error><Code>NoSuchUpload</Code><Message>gone</Message></Error>";
        assert_eq!(error_message(error), "NoSuchUpload: gone");
    }

    #[test]
    fn test_xml_with_namespace_and_declaration() {
        let body = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
                    <InitiateMultipartUploadResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\n\
                      <Bucket>b</Bucket>\n\
                      <Key>uploads/a.bin</Key>\n\
                      <UploadId>\n  abc-123\n</UploadId>\n\
                    </InitiateMultipartUploadResult>";
        assert_eq!(xml_tag(body, "UploadId").as_deref(), Some("abc-123"));
        assert_eq!(root_element(body).as_deref(), Some("InitiateMultipartUploadResult"));
    }

    #[test]
    fn test_completion_error_detection() {
        let failed = "<?xml version=\"1.0\"?><Error><Code>InternalError</Code></Error>";
        assert_eq!(root_element(failed).as_deref(), Some("Error"));

        let ok = "<CompleteMultipartUploadResult><ETag>\"x-2\"</ETag>\
                  </CompleteMultipartUploadResult>";
        assert_eq!(root_element(ok).as_deref(), Some("CompleteMultipartUploadResult"));
        assert_eq!(error_message("not xml at all"), "not xml at all");
    }
}
