//! Blob store abstraction
//!
//! Transfers land in a blob store through a multipart upload session. The
//! coordinator opens the session and presigns one URL per part; agents PUT
//! the parts directly; the coordinator finalizes or aborts the session.

mod memory;
mod s3;
pub mod sigv4;

pub use memory::{CompletionCall, MemoryBlobStore};
pub use s3::S3BlobStore;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use fb_protocol::PartUrl;

/// Blob store errors
#[derive(Error, Debug)]
pub enum BlobError {
    /// HTTP transport failure
    #[error("blob store request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-success reply from the blob store
    #[error("blob store returned {status}: {message}")]
    Status { status: u16, message: String },

    /// A reply was missing an expected field
    #[error("blob store reply is missing {0}")]
    MissingField(&'static str),

    /// Request signing failed
    #[error("request signing failed: {0}")]
    Signing(String),

    /// Unknown object or session
    #[error("not found: {0}")]
    NotFound(String),

    /// Part list rejected at finalization
    #[error("invalid part list: {0}")]
    InvalidParts(String),
}

/// Parameters for opening a multipart upload session
#[derive(Debug, Clone)]
pub struct MultipartRequest {
    /// Object key
    pub key: String,
    /// Number of bytes the session must be able to hold
    pub size: u64,
    /// Bytes per part
    pub chunk_size: u64,
    /// Lifetime of each presigned part URL
    pub url_expiry: Duration,
    /// User metadata stored with the object
    pub metadata: HashMap<String, String>,
}

impl MultipartRequest {
    /// Number of parts needed to hold `size` bytes
    pub fn part_count(&self) -> u32 {
        part_count(self.size, self.chunk_size)
    }
}

/// An open multipart upload session
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartSession {
    /// Blob store's id for the session
    pub session_id: String,
    pub bucket: String,
    pub key: String,
    /// One presigned URL per part, in ascending order
    pub part_urls: Vec<PartUrl>,
}

/// A finished part as reported by the uploader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Object metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
}

/// Multipart-capable blob store
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bucket receiving uploads
    fn bucket(&self) -> &str;

    /// Region reported in tickets
    fn region(&self) -> &str;

    /// Open a session and presign a URL for every part
    async fn initiate_multipart(
        &self,
        request: MultipartRequest,
    ) -> Result<MultipartSession, BlobError>;

    /// Assemble the object from parts given in ascending part order
    async fn complete_multipart(
        &self,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), BlobError>;

    /// Discard a session and any uploaded parts
    async fn abort_multipart(&self, key: &str, session_id: &str) -> Result<(), BlobError>;

    /// Look up a finished object
    async fn head_object(&self, key: &str) -> Result<ObjectInfo, BlobError>;
}

/// Number of `chunk_size` parts needed to hold `size` bytes (at least one)
pub fn part_count(size: u64, chunk_size: u64) -> u32 {
    if chunk_size == 0 {
        return 1;
    }
    size.div_ceil(chunk_size).max(1) as u32
}

/// Everything but RFC 3986 unreserved characters
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// As [`URI_COMPONENT`], but keeps path separators
const URI_PATH: &AsciiSet = &URI_COMPONENT.remove(b'/');

/// Percent-encode a string per RFC 3986, leaving unreserved characters and,
/// when `keep_slash` is set, `/` untouched.
pub fn uri_encode(input: &str, keep_slash: bool) -> String {
    let set = if keep_slash { URI_PATH } else { URI_COMPONENT };
    utf8_percent_encode(input, set).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_count() {
        const MB: u64 = 1024 * 1024;
        assert_eq!(part_count(12 * MB, 5 * MB), 3);
        assert_eq!(part_count(10 * MB, 5 * MB), 2);
        assert_eq!(part_count(100 * MB, 5 * MB), 20);
        assert_eq!(part_count(0, 5 * MB), 1);
        assert_eq!(part_count(1, 5 * MB), 1);
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("a b/c~d", true), "a%20b/c~d");
        assert_eq!(uri_encode("a b/c", false), "a%20b%2Fc");
        assert_eq!(uri_encode("é", false), "%C3%A9");
        assert_eq!(uri_encode("x-amz-meta_1.txt", false), "x-amz-meta_1.txt");
        assert_eq!(uri_encode("a+b=c&d", true), "a%2Bb%3Dc%26d");
    }
}
