//! YouTube resumable upload session
//!
//! Protocol:
//! 1. POST metadata to `{upload_url}?uploadType=resumable`; the session URI
//!    comes back in `Location`
//! 2. PUT chunks with `Content-Range: bytes a-b/total`; `308` + `Range`
//!    reports the committed offset, `200`/`201` carries the video resource
//! 3. After a failure, PUT an empty body with `Content-Range: bytes */total`
//!    to learn the committed offset before sending again

use std::io::SeekFrom;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::upload::{
    ChunkAttempt, ChunkSession, SendFailure, UploadError, UploadJob, UploadProgress,
    VideoMetadata, CHUNK_GRANULARITY,
};

const RESUME_INCOMPLETE: u16 = 308;

/// Platform reply to a chunk or status query
enum Reply {
    /// Bytes committed so far
    Incomplete(u64),
    Done(Value),
}

pub struct ResumableSession {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
    metadata: VideoMetadata,
    content_type: String,
    file: tokio::fs::File,
    total_size: u64,
    /// 0 sends everything that remains in one request
    chunk_size: u64,
    session_uri: Option<String>,
    offset: u64,
    needs_resync: bool,
}

impl ResumableSession {
    /// Open the job's file; nothing is sent until the first `next_chunk`
    pub async fn open(
        http: reqwest::Client,
        endpoint: &str,
        access_token: &str,
        job: &UploadJob,
        chunk_size: u64,
    ) -> Result<Self, UploadError> {
        let file = tokio::fs::File::open(&job.file_path).await?;
        let total_size = file.metadata().await?.len();

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            access_token: access_token.to_string(),
            metadata: job.metadata.clone(),
            content_type: job.content_type.clone(),
            file,
            total_size,
            chunk_size: effective_chunk_size(chunk_size),
            session_uri: None,
            offset: 0,
            needs_resync: false,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    async fn advance(&mut self) -> Result<Reply, SendFailure> {
        let uri = match &self.session_uri {
            Some(uri) => uri.clone(),
            None => {
                let uri = self.initiate().await?;
                tracing::debug!(session_uri = %uri, total_bytes = self.total_size, "Resumable session created");
                self.session_uri = Some(uri.clone());
                uri
            }
        };

        if self.needs_resync {
            match self.query_offset(&uri).await? {
                Reply::Incomplete(committed) => {
                    tracing::debug!(committed, "Resuming from committed offset");
                    self.offset = committed;
                    self.needs_resync = false;
                }
                done => return Ok(done),
            }
        }

        self.send_chunk(&uri).await
    }

    async fn initiate(&self) -> Result<String, SendFailure> {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}uploadType=resumable&part=snippet,status",
            self.endpoint, separator
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .header("X-Upload-Content-Length", self.total_size)
            .header("X-Upload-Content-Type", &self.content_type)
            .json(&self.metadata.to_resource())
            .send()
            .await
            .map_err(|e| SendFailure::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SendFailure::http(status.as_u16(), body));
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                SendFailure::protocol(format!(
                    "upload initiation returned {} without a session URI",
                    status
                ))
            })
    }

    async fn query_offset(&self, uri: &str) -> Result<Reply, SendFailure> {
        let response = self
            .http
            .put(uri)
            .bearer_auth(&self.access_token)
            .header(CONTENT_RANGE, format!("bytes */{}", self.total_size))
            .header(CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| SendFailure::transport(e.to_string()))?;

        read_reply(response).await
    }

    async fn send_chunk(&mut self, uri: &str) -> Result<Reply, SendFailure> {
        let chunk = self
            .read_chunk()
            .await
            .map_err(|e| SendFailure::transport(format!("failed to read upload source: {}", e)))?;
        let range = content_range(self.offset, chunk.len() as u64, self.total_size);

        let response = self
            .http
            .put(uri)
            .bearer_auth(&self.access_token)
            .header(CONTENT_TYPE, &self.content_type)
            .header(CONTENT_RANGE, range)
            .body(chunk)
            .send()
            .await
            .map_err(|e| SendFailure::transport(e.to_string()))?;

        read_reply(response).await
    }

    async fn read_chunk(&mut self) -> std::io::Result<Vec<u8>> {
        let remaining = self.total_size.saturating_sub(self.offset);
        let len = match self.chunk_size {
            0 => remaining,
            size => remaining.min(size),
        };

        self.file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::with_capacity(len as usize);
        (&mut self.file).take(len).read_to_end(&mut buf).await?;

        if (buf.len() as u64) < len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "upload source is shorter than announced",
            ));
        }
        Ok(buf)
    }
}

#[async_trait]
impl ChunkSession for ResumableSession {
    async fn next_chunk(&mut self) -> ChunkAttempt {
        match self.advance().await {
            Ok(Reply::Incomplete(committed)) => {
                self.offset = committed;
                ChunkAttempt::Progress(UploadProgress {
                    bytes_sent: committed,
                    total_bytes: self.total_size,
                })
            }
            Ok(Reply::Done(payload)) => ChunkAttempt::Complete(payload),
            Err(failure) => {
                // The platform may have committed part of the chunk
                if self.session_uri.is_some() {
                    self.needs_resync = true;
                }
                ChunkAttempt::Failed(failure)
            }
        }
    }
}

async fn read_reply(response: reqwest::Response) -> Result<Reply, SendFailure> {
    let status = response.status();

    if status.as_u16() == RESUME_INCOMPLETE {
        let committed = response
            .headers()
            .get(RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_range_end)
            .map(|end| end + 1)
            .unwrap_or(0);
        return Ok(Reply::Incomplete(committed));
    }

    let body = response
        .text()
        .await
        .map_err(|e| SendFailure::transport(e.to_string()))?;

    if status.is_success() {
        let payload = serde_json::from_str(&body).unwrap_or(Value::String(body));
        return Ok(Reply::Done(payload));
    }

    Err(SendFailure::http(status.as_u16(), body))
}

/// Round a requested chunk size down to the platform's granularity
fn effective_chunk_size(requested: u64) -> u64 {
    if requested == 0 {
        return 0;
    }
    (requested / CHUNK_GRANULARITY).max(1) * CHUNK_GRANULARITY
}

fn content_range(start: u64, len: u64, total: u64) -> String {
    if len == 0 {
        format!("bytes */{}", total)
    } else {
        format!("bytes {}-{}/{}", start, start + len - 1, total)
    }
}

/// Last committed byte from a `Range: bytes=0-N` header
fn parse_range_end(value: &str) -> Option<u64> {
    value
        .trim()
        .strip_prefix("bytes=")?
        .split_once('-')?
        .1
        .trim()
        .parse()
        .ok()
}

// ============================================================================
// Tests
// ============================================================================
