//! Upload transport.
//!
//! A [`Transport`] moves one artifact to the server and reports progress as
//! the server acknowledges bytes. Success means the server has the whole
//! artifact and has handed it to the analysis worker.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coordinator::ProgressSink;
use crate::error::TransportError;

/// Default chunk size for HTTP uploads: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Largest chunk sent in one request: 1 MiB, well under the server's body limit.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// A document to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub label: String,
    pub content: Vec<u8>,
}

impl Artifact {
    pub fn new(label: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            label: label.into(),
            content,
        }
    }

    /// Read a file from disk, labelled with its file name.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let content = tokio::fs::read(path).await?;
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { label, content })
    }
}

/// Moves artifacts to the server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn upload(
        &self,
        task_id: &str,
        artifact: &Artifact,
        progress: &mut ProgressSink,
    ) -> Result<(), TransportError>;
}

/// One chunk of an upload, as posted to `/api/uploads/{task_id}/chunks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadChunk {
    pub label: String,
    pub offset: u64,
    /// Base64-encoded bytes.
    pub data: String,
    /// Set on the final chunk; the server dispatches the artifact after it.
    pub last: bool,
}

/// Server acknowledgement for a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkAck {
    pub received: u64,
    pub complete: bool,
}

/// Chunked JSON upload over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: String,
    chunk_size: usize,
}

impl HttpTransport {
    /// Create a transport for the server at `base_url`, authenticated with a session token.
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Bytes per request, clamped to `1..=MAX_CHUNK_SIZE`.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn upload(
        &self,
        task_id: &str,
        artifact: &Artifact,
        progress: &mut ProgressSink,
    ) -> Result<(), TransportError> {
        let url = format!("{}/api/uploads/{}/chunks", self.base_url, task_id);
        let total = artifact.content.len() as u64;
        let chunks: Vec<&[u8]> = if artifact.content.is_empty() {
            vec![&artifact.content[..]]
        } else {
            artifact.content.chunks(self.chunk_size).collect()
        };
        let count = chunks.len();
        let mut offset = 0u64;

        for (i, chunk) in chunks.into_iter().enumerate() {
            let body = UploadChunk {
                label: artifact.label.clone(),
                offset,
                data: STANDARD.encode(chunk),
                last: i + 1 == count,
            };

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.token)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(TransportError::Rejected {
                    status: status.as_u16(),
                    message,
                });
            }

            let ack: ChunkAck = response.json().await?;
            offset = ack.received;
            debug!(task_id, offset, total, "Chunk acknowledged");
            progress.report(offset, total);
        }

        Ok(())
    }
}
