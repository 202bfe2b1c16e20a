//! In-process blob store
//!
//! Keeps sessions and objects in memory and serves part uploads through an
//! axum router mounted under `/blob`. Used for local development and as the
//! blob endpoint in tests; it records every finalization and abort and can
//! be told to fail parts or completions.

use async_trait::async_trait;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::put;
use axum::Router;
use bytes::Bytes;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use fb_protocol::PartUrl;

use super::{
    uri_encode, BlobError, BlobStore, CompletedPart, MultipartRequest, MultipartSession,
    ObjectInfo,
};

/// Path prefix of the upload router
const BLOB_PATH: &str = "/blob";

/// A recorded call to `complete_multipart`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCall {
    pub key: String,
    pub session_id: String,
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug)]
struct Session {
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

struct Inner {
    bucket: String,
    base_url: String,
    next_session: AtomicU64,
    sessions: DashMap<String, Session>,
    objects: DashMap<String, Bytes>,
    completions: Mutex<Vec<CompletionCall>>,
    aborts: Mutex<Vec<String>>,
    failing_parts: DashSet<u32>,
    fail_completions: AtomicBool,
}

/// Blob store held in memory
#[derive(Clone)]
pub struct MemoryBlobStore {
    inner: Arc<Inner>,
}

impl MemoryBlobStore {
    /// Create a store whose part URLs point at `base_url` (where
    /// [`MemoryBlobStore::router`] is served)
    pub fn new(bucket: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                bucket: bucket.into(),
                base_url: base_url.into().trim_end_matches('/').to_string(),
                next_session: AtomicU64::new(1),
                sessions: DashMap::new(),
                objects: DashMap::new(),
                completions: Mutex::new(Vec::new()),
                aborts: Mutex::new(Vec::new()),
                failing_parts: DashSet::new(),
                fail_completions: AtomicBool::new(false),
            }),
        }
    }

    /// Router accepting `PUT /blob/{key}?partNumber=N&uploadId=ID`
    pub fn router(&self) -> Router {
        Router::new()
            .route("/blob/*key", put(upload_part))
            .layer(DefaultBodyLimit::disable())
            .with_state(self.inner.clone())
    }

    /// Make every upload of this part number fail with a 500
    pub fn fail_part(&self, part_number: u32) {
        self.inner.failing_parts.insert(part_number);
    }

    /// Make `complete_multipart` fail
    pub fn fail_completions(&self, fail: bool) {
        self.inner.fail_completions.store(fail, Ordering::SeqCst);
    }

    /// Every `complete_multipart` call so far
    pub async fn completions(&self) -> Vec<CompletionCall> {
        self.inner.completions.lock().await.clone()
    }

    /// Session ids passed to `abort_multipart` so far
    pub async fn aborts(&self) -> Vec<String> {
        self.inner.aborts.lock().await.clone()
    }

    /// A finished object's content
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.inner.objects.get(key).map(|o| o.value().clone())
    }

    /// Parts uploaded so far to an open session
    pub fn uploaded_parts(&self, session_id: &str) -> Vec<u32> {
        self.inner
            .sessions
            .get(session_id)
            .map(|s| s.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of open sessions
    pub fn open_sessions(&self) -> usize {
        self.inner.sessions.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn bucket(&self) -> &str {
        &self.inner.bucket
    }

    fn region(&self) -> &str {
        "local"
    }

    async fn initiate_multipart(
        &self,
        request: MultipartRequest,
    ) -> Result<MultipartSession, BlobError> {
        let session_id = format!(
            "mem-{}",
            self.inner.next_session.fetch_add(1, Ordering::Relaxed)
        );
        self.inner.sessions.insert(
            session_id.clone(),
            Session {
                key: request.key.clone(),
                parts: BTreeMap::new(),
            },
        );

        let expires_at = chrono::Duration::from_std(request.url_expiry)
            .ok()
            .map(|d| Utc::now() + d);
        let encoded_key = uri_encode(&request.key, true);
        let part_urls = (1..=request.part_count())
            .map(|part_number| PartUrl {
                part_number,
                url: format!(
                    "{}{}/{}?partNumber={}&uploadId={}",
                    self.inner.base_url, BLOB_PATH, encoded_key, part_number, session_id
                ),
                expires_at,
            })
            .collect();

        Ok(MultipartSession {
            session_id,
            bucket: self.inner.bucket.clone(),
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
        self.inner.completions.lock().await.push(CompletionCall {
            key: key.to_string(),
            session_id: session_id.to_string(),
            parts: parts.to_vec(),
        });

        if self.inner.fail_completions.load(Ordering::SeqCst) {
            return Err(BlobError::Status {
                status: 500,
                message: "InternalError: injected completion failure".into(),
            });
        }

        let session = self
            .inner
            .sessions
            .get(session_id)
            .ok_or_else(|| BlobError::NotFound(format!("upload {}", session_id)))?;
        if session.key != key {
            return Err(BlobError::InvalidParts(format!(
                "session {} belongs to {}",
                session_id, session.key
            )));
        }
        if parts.is_empty() {
            return Err(BlobError::InvalidParts("no parts".into()));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(BlobError::InvalidParts(
                "parts are not in ascending order".into(),
            ));
        }

        let mut object = Vec::new();
        for part in parts {
            match session.parts.get(&part.part_number) {
                Some((etag, data)) if *etag == part.etag => object.extend_from_slice(data),
                Some(_) => {
                    return Err(BlobError::InvalidParts(format!(
                        "etag mismatch for part {}",
                        part.part_number
                    )))
                }
                None => {
                    return Err(BlobError::InvalidParts(format!(
                        "part {} was never uploaded",
                        part.part_number
                    )))
                }
            }
        }
        drop(session);

        self.inner.sessions.remove(session_id);
        self.inner
            .objects
            .insert(key.to_string(), Bytes::from(object));
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, session_id: &str) -> Result<(), BlobError> {
        self.inner.aborts.lock().await.push(session_id.to_string());
        self.inner
            .sessions
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(format!("upload {}", session_id)))
    }

    async fn head_object(&self, key: &str) -> Result<ObjectInfo, BlobError> {
        let object = self
            .inner
            .objects
            .get(key)
            .ok_or_else(|| BlobError::NotFound(key.to_string()))?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: object.len() as u64,
            etag: Some(etag_for(&object)),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartQuery {
    part_number: u32,
    upload_id: String,
}

async fn upload_part(
    State(inner): State<Arc<Inner>>,
    Path(key): Path<String>,
    Query(query): Query<PartQuery>,
    body: Bytes,
) -> Response {
    if query.part_number == 0 || query.part_number > 10_000 {
        return (StatusCode::BAD_REQUEST, "InvalidArgument: part number").into_response();
    }
    if inner.failing_parts.contains(&query.part_number) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "InternalError: injected part failure",
        )
            .into_response();
    }

    let Some(mut session) = inner.sessions.get_mut(&query.upload_id) else {
        return (StatusCode::NOT_FOUND, "NoSuchUpload").into_response();
    };
    if session.key != key {
        return (StatusCode::BAD_REQUEST, "InvalidArgument: key mismatch").into_response();
    }

    let etag = etag_for(&body);
    tracing::trace!(
        "Stored part {} of {} ({} bytes)",
        query.part_number,
        query.upload_id,
        body.len()
    );
    session
        .parts
        .insert(query.part_number, (etag.clone(), body));

    (StatusCode::OK, [(header::ETAG, etag)]).into_response()
}

fn etag_for(data: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::collections::HashMap;
    use std::time::Duration;
    use tower::ServiceExt;

    fn request(key: &str, size: u64) -> MultipartRequest {
        MultipartRequest {
            key: key.into(),
            size,
            chunk_size: 4,
            url_expiry: Duration::from_secs(60),
            metadata: HashMap::new(),
        }
    }

    async fn put_part(store: &MemoryBlobStore, url: &str, data: &'static str) -> Response {
        let path = url.trim_start_matches("http://blob.test");
        store
            .router()
            .oneshot(
                Request::put(path)
                    .body(Body::from(data))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_and_complete() {
        let store = MemoryBlobStore::new("bucket", "http://blob.test/");
        let session = store
            .initiate_multipart(request("uploads/a 1/f.bin", 10))
            .await
            .unwrap();
        assert_eq!(session.part_urls.len(), 3);
        assert!(session.part_urls[0]
            .url
            .starts_with("http://blob.test/blob/uploads/a%201/f.bin?partNumber=1&uploadId=mem-"));

        let mut parts = Vec::new();
        for (url, data) in session.part_urls.iter().zip(["abcd", "efgh", "ij"]) {
            let response = put_part(&store, &url.url, data).await;
            assert_eq!(response.status(), StatusCode::OK);
            let etag = response.headers()[header::ETAG].to_str().unwrap().to_string();
            parts.push(CompletedPart {
                part_number: url.part_number,
                etag,
            });
        }

        store
            .complete_multipart(&session.key, &session.session_id, &parts)
            .await
            .unwrap();
        assert_eq!(store.object("uploads/a 1/f.bin").unwrap(), "abcdefghij");
        assert_eq!(store.head_object(&session.key).await.unwrap().size, 10);
        assert_eq!(store.open_sessions(), 0);
        assert_eq!(store.completions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_complete_rejects_unsorted_parts() {
        let store = MemoryBlobStore::new("bucket", "http://blob.test");
        let session = store.initiate_multipart(request("k", 8)).await.unwrap();
        for (url, data) in session.part_urls.iter().zip(["abcd", "efgh"]) {
            put_part(&store, &url.url, data).await;
        }
        let parts = vec![
            CompletedPart {
                part_number: 2,
                etag: etag_for(b"efgh"),
            },
            CompletedPart {
                part_number: 1,
                etag: etag_for(b"abcd"),
            },
        ];
        assert!(matches!(
            store
                .complete_multipart("k", &session.session_id, &parts)
                .await,
            Err(BlobError::InvalidParts(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failures_and_abort() {
        let store = MemoryBlobStore::new("bucket", "http://blob.test");
        store.fail_part(2);
        let session = store.initiate_multipart(request("k", 8)).await.unwrap();

        let response = put_part(&store, &session.part_urls[1].url, "efgh").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(store.uploaded_parts(&session.session_id).is_empty());

        store.abort_multipart("k", &session.session_id).await.unwrap();
        assert_eq!(store.aborts().await, vec![session.session_id.clone()]);
        assert!(matches!(
            store.abort_multipart("k", &session.session_id).await,
            Err(BlobError::NotFound(_))
        ));

        let response = put_part(&store, &session.part_urls[0].url, "abcd").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
