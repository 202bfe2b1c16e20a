//! Multipart upload of one local file

use futures::stream::{self, StreamExt};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use fb_core::AgentId;
use fb_protocol::{DownloadFileResult, EtagMap, Message, StatusMessage, UploadProgress, UploadTicket};

use super::ExecutorError;
use crate::channel::Outbound;

/// Byte range of one part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    pub part_number: u32,
    pub offset: u64,
    pub len: u64,
}

/// Split `size` bytes into `max(1, ceil(size / chunk_size))` parts.
///
/// An empty file still gets one (empty) part.
pub fn plan_parts(size: u64, chunk_size: u64) -> Vec<PartPlan> {
    let chunk_size = chunk_size.max(1);
    let count = size.div_ceil(chunk_size).max(1);
    (0..count)
        .map(|index| {
            let offset = index * chunk_size;
            PartPlan {
                part_number: index as u32 + 1,
                offset,
                len: chunk_size.min(size.saturating_sub(offset)),
            }
        })
        .collect()
}

pub(super) struct Upload<'a> {
    pub http: &'a reqwest::Client,
    pub agent_id: &'a AgentId,
    pub path: PathBuf,
    pub display_path: &'a str,
    pub ticket: &'a UploadTicket,
    pub concurrency: usize,
    pub part_timeout: Duration,
    pub cancel: &'a CancellationToken,
    pub out: &'a Outbound,
}

impl Upload<'_> {
    pub async fn run(self) -> Result<DownloadFileResult, ExecutorError> {
        let started = Instant::now();
        self.ticket.validate().map_err(ExecutorError::InvalidTicket)?;

        let file_size = tokio::fs::metadata(&self.path).await?.len();
        let parts = plan_parts(file_size, self.ticket.chunk_size);
        let total_parts = parts.len() as u32;
        if total_parts > self.ticket.part_count() {
            return Err(ExecutorError::InvalidTicket(format!(
                "file needs {} parts of {} bytes, ticket has {}",
                total_parts,
                self.ticket.chunk_size,
                self.ticket.part_count()
            )));
        }
        tracing::debug!(
            "Uploading {} ({} bytes) in {} parts",
            self.display_path,
            file_size,
            total_parts
        );

        let mut etags = EtagMap::new();
        let mut bytes_uploaded = 0u64;
        let mut uploads = stream::iter(parts)
            .map(|part| self.upload_part(part))
            .buffer_unordered(self.concurrency);

        while let Some(result) = uploads.next().await {
            let (part, etag) = result?;
            etags.insert(part.part_number.to_string(), etag);
            bytes_uploaded += part.len;
            self.report(file_size, total_parts, bytes_uploaded, &etags).await;
        }

        Ok(DownloadFileResult {
            upload_id: self.ticket.upload_id.clone(),
            file_path: self.display_path.to_string(),
            file_size,
            total_parts,
            completed_parts: etags.len() as u32,
            bytes_uploaded,
            duration_ms: started.elapsed().as_millis() as u64,
            s3_key: self.ticket.key.clone(),
            etags,
        })
    }

    async fn upload_part(&self, part: PartPlan) -> Result<(PartPlan, String), ExecutorError> {
        if self.cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        let url = self
            .ticket
            .presigned_urls
            .get(part.part_number as usize - 1)
            .map(|p| p.url.as_str())
            .ok_or_else(|| {
                ExecutorError::InvalidTicket(format!("no URL for part {}", part.part_number))
            })?;
        let body = read_part(&self.path, part).await?;

        let failed = |reason: String| ExecutorError::ChunkUploadFailed {
            part: part.part_number,
            reason,
        };
        let response = self
            .http
            .put(url)
            .timeout(self.part_timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {}: {}", status, text.trim())));
        }
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| failed("response has no ETag".into()))?;

        tracing::trace!("Uploaded part {} ({} bytes)", part.part_number, part.len);
        Ok((part, etag))
    }

    async fn report(&self, file_size: u64, total_parts: u32, bytes_uploaded: u64, etags: &EtagMap) {
        let completed_parts = etags.len() as u32;
        let mut status = StatusMessage::new(self.agent_id.as_str(), "uploading");
        status.current_upload = Some(UploadProgress {
            upload_id: self.ticket.upload_id.clone(),
            file_path: self.display_path.to_string(),
            file_size,
            total_parts,
            completed_parts,
            bytes_uploaded,
            progress: f64::from(completed_parts) * 100.0 / f64::from(total_parts),
            etags: etags.clone(),
        });
        if self.out.send(Message::Status(status)).await.is_err() {
            tracing::debug!("Channel closed, progress for {} not reported", self.ticket.upload_id);
        }
    }
}

async fn read_part(path: &Path, part: PartPlan) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(part.offset)).await?;
    let mut buf = vec![0u8; part.len as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_plan_splits_last_part_short() {
        let parts = plan_parts(12 * MB, 5 * MB);
        let lens: Vec<u64> = parts.iter().map(|p| p.len).collect();
        assert_eq!(lens, vec![5 * MB, 5 * MB, 2 * MB]);
        assert_eq!(parts[2].offset, 10 * MB);
        assert_eq!(parts[2].part_number, 3);
    }

    #[test]
    fn test_plan_exact_multiple() {
        let parts = plan_parts(10, 5);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1], PartPlan { part_number: 2, offset: 5, len: 5 });
    }

    #[test]
    fn test_plan_empty_file_uses_one_part() {
        assert_eq!(
            plan_parts(0, 5 * MB),
            vec![PartPlan { part_number: 1, offset: 0, len: 0 }]
        );
    }

    #[tokio::test]
    async fn test_read_part_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"hello world!").await.unwrap();

        let part = PartPlan { part_number: 3, offset: 10, len: 2 };
        assert_eq!(read_part(&path, part).await.unwrap(), b"d!");
    }
}
