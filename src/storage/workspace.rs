//! Per-request working directories
//!
//! Every upload request gets its own uniquely named directory under the
//! configured root, so concurrent requests never see each other's files.
//! The directory and everything in it is removed by
//! [`JobWorkspace::cleanup`], or on the blocking pool when the workspace is
//! dropped.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use futures::{pin_mut, Stream, TryStreamExt};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

const FALLBACK_FILE_NAME: &str = "upload.bin";

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Failed to write upload: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload stream interrupted: {0}")]
    Stream(String),
}

/// A file written into a workspace
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug)]
pub struct JobWorkspace {
    path: PathBuf,
    /// `None` once removal has been handed off
    dir: Option<TempDir>,
}

impl JobWorkspace {
    pub async fn create(root: &Path) -> Result<Self, WorkspaceError> {
        tokio::fs::create_dir_all(root).await?;
        let dir = tempfile::Builder::new().prefix("upload-").tempdir_in(root)?;

        tracing::debug!(path = %dir.path().display(), "Created upload workspace");
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the workspace on the blocking pool and wait for it
    pub async fn cleanup(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(Ok(())) => tracing::debug!(path = %self.path.display(), "Removed upload workspace"),
            Ok(Err(e)) => tracing::warn!(path = %self.path.display(), "Failed to remove upload workspace: {}", e),
            Err(e) => tracing::warn!(path = %self.path.display(), "Workspace removal task failed: {}", e),
        }
    }

    /// Stream `body` into the workspace under a sanitized `file_name`
    pub async fn save_stream<S, E>(&self, file_name: &str, body: S) -> Result<StoredFile, WorkspaceError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let path = self.path.join(sanitize_filename(file_name));
        let mut file = tokio::fs::File::create(&path).await?;
        let mut size = 0u64;

        pin_mut!(body);
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| WorkspaceError::Stream(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::debug!(path = %path.display(), size, "Stored uploaded file");
        Ok(StoredFile { path, size })
    }
}

impl Drop for JobWorkspace {
    /// Early exits still remove the directory, off the async worker threads
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || drop(dir));
            }
            Err(_) => drop(dir),
        }
    }
}

/// Reduce a client-supplied file name to a safe single path component
pub fn sanitize_filename(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();

    let trimmed = cleaned.trim_start_matches(['.', '_']);
    if trimmed.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}
