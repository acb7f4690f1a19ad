//! Partial uploads, assembled chunk by chunk until the last one arrives.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use batchwire_core::transport::UploadChunk;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::dispatch::AnalysisJob;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StagingError {
    #[error("chunk data is not valid base64")]
    InvalidEncoding,

    #[error("expected chunk at offset {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("upload exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

/// Result of accepting a chunk.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// More chunks are expected.
    Partial { received: u64 },
    /// The last chunk arrived; the artifact left staging.
    Complete(AnalysisJob),
}

struct StagedUpload {
    label: String,
    content: Vec<u8>,
    touched: Instant,
}

pub struct UploadStaging {
    max_bytes: u64,
    uploads: Mutex<HashMap<(String, String), StagedUpload>>,
}

impl UploadStaging {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            uploads: Mutex::new(HashMap::new()),
        }
    }

    /// Largest upload accepted, in bytes.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Append a chunk to `owner_id`'s upload for `task_id`.
    ///
    /// A chunk at offset 0 (re)starts the upload. Any other chunk must start
    /// where the previous one ended.
    pub async fn accept(
        &self,
        owner_id: &str,
        task_id: &str,
        chunk: UploadChunk,
    ) -> Result<ChunkOutcome, StagingError> {
        let bytes = STANDARD
            .decode(chunk.data.as_bytes())
            .map_err(|_| StagingError::InvalidEncoding)?;
        let key = (owner_id.to_string(), task_id.to_string());

        let mut uploads = self.uploads.lock().await;
        if chunk.offset == 0 {
            uploads.insert(
                key.clone(),
                StagedUpload {
                    label: chunk.label.clone(),
                    content: Vec::new(),
                    touched: Instant::now(),
                },
            );
        }

        let received = uploads.get(&key).map_or(0, |u| u.content.len() as u64);
        let Some(upload) = uploads.get_mut(&key).filter(|_| received == chunk.offset) else {
            return Err(StagingError::OutOfOrder {
                expected: received,
                got: chunk.offset,
            });
        };

        if received + bytes.len() as u64 > self.max_bytes {
            uploads.remove(&key);
            return Err(StagingError::TooLarge {
                limit: self.max_bytes,
            });
        }

        upload.content.extend_from_slice(&bytes);
        upload.touched = Instant::now();
        let received = upload.content.len() as u64;
        debug!(owner_id, task_id, received, "Chunk staged");

        if !chunk.last {
            return Ok(ChunkOutcome::Partial { received });
        }

        let Some(upload) = uploads.remove(&key) else {
            return Ok(ChunkOutcome::Partial { received });
        };
        info!(owner_id, task_id, bytes = received, "Upload assembled");
        Ok(ChunkOutcome::Complete(AnalysisJob {
            owner_id: owner_id.to_string(),
            task_id: task_id.to_string(),
            label: upload.label,
            content: upload.content,
        }))
    }

    /// Drop uploads that have not received a chunk for `max_age`.
    pub async fn purge_older_than(&self, max_age: Duration) -> usize {
        let mut uploads = self.uploads.lock().await;
        let before = uploads.len();
        uploads.retain(|_, u| u.touched.elapsed() < max_age);
        let purged = before - uploads.len();
        if purged > 0 {
            info!(purged, "Purged abandoned uploads");
        }
        purged
    }

    pub async fn pending(&self) -> usize {
        self.uploads.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(offset: u64, data: &[u8], last: bool) -> UploadChunk {
        UploadChunk {
            label: "cv.pdf".into(),
            offset,
            data: STANDARD.encode(data),
            last,
        }
    }

    #[tokio::test]
    async fn test_chunks_assemble_into_job() {
        let staging = UploadStaging::new(1024);

        let first = staging.accept("u1", "t1", chunk(0, b"hello ", false)).await.unwrap();
        assert!(matches!(first, ChunkOutcome::Partial { received: 6 }));

        match staging.accept("u1", "t1", chunk(6, b"world", true)).await.unwrap() {
            ChunkOutcome::Complete(job) => {
                assert_eq!(job.owner_id, "u1");
                assert_eq!(job.label, "cv.pdf");
                assert_eq!(job.content, b"hello world");
            }
            other => panic!("expected complete upload, got {:?}", other),
        }
        assert_eq!(staging.pending().await, 0);
    }

    #[tokio::test]
    async fn test_out_of_order_chunk_rejected() {
        let staging = UploadStaging::new(1024);
        staging.accept("u1", "t1", chunk(0, b"abc", false)).await.unwrap();

        let err = staging.accept("u1", "t1", chunk(10, b"def", true)).await.unwrap_err();
        assert_eq!(err, StagingError::OutOfOrder { expected: 3, got: 10 });

        let err = staging.accept("u1", "t9", chunk(3, b"def", true)).await.unwrap_err();
        assert_eq!(err, StagingError::OutOfOrder { expected: 0, got: 3 });
    }

    #[tokio::test]
    async fn test_uploads_are_scoped_by_owner() {
        let staging = UploadStaging::new(1024);
        staging.accept("u1", "t1", chunk(0, b"abc", false)).await.unwrap();

        let err = staging.accept("u2", "t1", chunk(3, b"def", true)).await.unwrap_err();
        assert!(matches!(err, StagingError::OutOfOrder { .. }));
    }

    #[tokio::test]
    async fn test_oversized_upload_dropped() {
        let staging = UploadStaging::new(4);
        staging.accept("u1", "t1", chunk(0, b"abc", false)).await.unwrap();

        let err = staging.accept("u1", "t1", chunk(3, b"de", true)).await.unwrap_err();
        assert_eq!(err, StagingError::TooLarge { limit: 4 });
        assert_eq!(staging.pending().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_base64_rejected() {
        let staging = UploadStaging::new(1024);
        let bad = UploadChunk {
            label: "cv.pdf".into(),
            offset: 0,
            data: "***".into(),
            last: true,
        };
        let err = staging.accept("u1", "t1", bad).await.unwrap_err();
        assert_eq!(err, StagingError::InvalidEncoding);
    }

    #[tokio::test]
    async fn test_purge_abandoned() {
        let staging = UploadStaging::new(1024);
        staging.accept("u1", "t1", chunk(0, b"abc", false)).await.unwrap();

        assert_eq!(staging.purge_older_than(Duration::from_secs(60)).await, 0);
        assert_eq!(staging.purge_older_than(Duration::ZERO).await, 1);
    }
}
