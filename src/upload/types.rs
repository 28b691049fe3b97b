//! Upload types for the resumable upload driver

use std::path::PathBuf;

use serde::Serialize;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retriable failures tolerated per upload
pub const MAX_RETRIES: u32 = 10;

/// HTTP statuses that indicate a transient platform failure
pub const RETRIABLE_STATUS_CODES: [u16; 4] = [500, 502, 503, 504];

/// Resumable chunks must be a multiple of 256 KiB (except the last one)
pub const CHUNK_GRANULARITY: u64 = 256 * 1024;

/// Default chunk size: 8MB
pub const DEFAULT_CHUNK_SIZE: u64 = 32 * CHUNK_GRANULARITY;

/// Privacy status used when the request does not name one
pub const DEFAULT_PRIVACY_STATUS: &str = "private";

// ============================================================================
// Job Types
// ============================================================================

/// Metadata attached to an uploaded video
#[derive(Debug, Clone, Default)]
pub struct VideoMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Platform category id (e.g. "22")
    pub category: Option<String>,
    pub tags: Vec<String>,
    /// Passed through as-is; the platform rejects unknown values
    pub privacy_status: String,
    /// Scheduled publish time, passed through as-is
    pub publish_at: Option<String>,
}

impl VideoMetadata {
    /// Build the `snippet,status` resource sent when initiating an upload
    pub fn to_resource(&self) -> VideoResource<'_> {
        VideoResource {
            snippet: Snippet {
                title: self.title.as_deref(),
                description: self.description.as_deref(),
                tags: &self.tags,
                category_id: self.category.as_deref(),
            },
            status: Status {
                privacy_status: &self.privacy_status,
                self_declared_made_for_kids: false,
                publish_at: self.publish_at.as_deref(),
            },
        }
    }
}

/// A single video to forward to the platform
#[derive(Debug, Clone)]
pub struct UploadJob {
    /// Local file holding the uploaded video
    pub file_path: PathBuf,
    /// MIME type reported by the client
    pub content_type: String,
    /// Credential profile used to authorize the upload
    pub profile: String,
    pub metadata: VideoMetadata,
}

#[derive(Debug, Serialize)]
pub struct VideoResource<'a> {
    pub snippet: Snippet<'a>,
    pub status: Status<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub tags: &'a [String],
    pub category_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status<'a> {
    pub privacy_status: &'a str,
    pub self_declared_made_for_kids: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_at: Option<&'a str>,
}

// ============================================================================
// Chunk Attempt Types
// ============================================================================

/// Raw result of asking a session to send its next chunk
#[derive(Debug, Clone)]
pub enum ChunkAttempt {
    /// The platform accepted bytes but has not produced a final response
    Progress(UploadProgress),
    /// The platform returned its final payload
    Complete(serde_json::Value),
    /// The attempt failed
    Failed(SendFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    /// Bytes committed on the platform side
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_sent as f64 / self.total_bytes as f64) * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection-level failure: refused, reset, timed out, unreadable source
    Transport,
    /// The platform answered with an error status
    Http { status: u16 },
    /// The platform answered successfully but broke the protocol
    Protocol,
}

#[derive(Debug, Clone)]
pub struct SendFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl SendFailure {
    pub fn transport(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transport,
            detail: detail.into(),
        }
    }

    pub fn http(status: u16, detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Http { status },
            detail: detail.into(),
        }
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Protocol,
            detail: detail.into(),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Terminal upload errors
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No longer attempting to retry after {retries} retries. Last error: {last_error}")]
    RetriesExhausted { retries: u32, last_error: String },

    #[error("An HTTP error {status} occurred:\n{body}")]
    NonRetriable { status: u16, body: String },

    #[error("The upload failed with an unexpected response: {0}")]
    MalformedResponse(String),

    #[error("Upload source unavailable: {0}")]
    Source(#[from] std::io::Error),
}
