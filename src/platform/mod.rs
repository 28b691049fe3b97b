//! Video platform publishing
//!
//! [`VideoPublisher`] is the seam between the HTTP layer and the platform.
//! [`YouTubePublisher`] authenticates, opens a resumable session and hands it
//! to the upload driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::auth::{AuthError, Authenticator};
use crate::config::Config;
use crate::upload::{UploadDriver, UploadError, UploadJob};

pub mod resumable;

pub use resumable::ResumableSession;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Publishes a local video file and returns the platform's identifier
#[async_trait]
pub trait VideoPublisher: Send + Sync {
    async fn publish(&self, job: &UploadJob) -> Result<String, PublishError>;
}

/// HTTP client for platform calls; redirects are off so `308` reaches the session
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}

pub struct YouTubePublisher {
    http: reqwest::Client,
    authenticator: Arc<dyn Authenticator>,
    driver: UploadDriver,
    upload_url: String,
    chunk_size: u64,
}

impl YouTubePublisher {
    pub fn new(config: &Config, http: reqwest::Client, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            http,
            authenticator,
            driver: UploadDriver::new(config.retry.clone()),
            upload_url: config.youtube.upload_url.clone(),
            chunk_size: config.youtube.chunk_size,
        }
    }
}

#[async_trait]
impl VideoPublisher for YouTubePublisher {
    async fn publish(&self, job: &UploadJob) -> Result<String, PublishError> {
        // Fail on an unreadable file before asking anyone for consent
        tokio::fs::metadata(&job.file_path)
            .await
            .map_err(UploadError::Source)?;

        let credentials = self.authenticator.obtain_credentials(&job.profile).await?;

        let mut session = ResumableSession::open(
            self.http.clone(),
            &self.upload_url,
            &credentials.access_token,
            job,
            self.chunk_size,
        )
        .await?;

        tracing::info!(
            profile = %job.profile,
            file = %job.file_path.display(),
            total_bytes = session.total_size(),
            "Starting resumable upload"
        );

        let report = self.driver.drive(&mut session).await?;
        Ok(report.video_id)
    }
}

/// Mock publisher for testing
#[cfg(test)]
pub struct MockPublisher {
    /// `None` makes every publish fail with a 403
    pub video_id: Option<String>,
    pub jobs: parking_lot::Mutex<Vec<RecordedJob>>,
}

#[cfg(test)]
pub struct RecordedJob {
    pub job: UploadJob,
    pub contents: Vec<u8>,
}

#[cfg(test)]
impl MockPublisher {
    pub fn succeeding(video_id: &str) -> Self {
        Self {
            video_id: Some(video_id.to_string()),
            jobs: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            video_id: None,
            jobs: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl VideoPublisher for MockPublisher {
    async fn publish(&self, job: &UploadJob) -> Result<String, PublishError> {
        let contents = std::fs::read(&job.file_path).map_err(UploadError::Source)?;
        self.jobs.lock().push(RecordedJob {
            job: job.clone(),
            contents,
        });

        match &self.video_id {
            Some(id) => Ok(id.clone()),
            None => Err(UploadError::NonRetriable {
                status: 403,
                body: "forbidden".to_string(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;
    use crate::upload::VideoMetadata;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAuthenticator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Authenticator for CountingAuthenticator {
        async fn obtain_credentials(&self, _profile: &str) -> Result<Credentials, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AuthError::Denied("access_denied".to_string()))
        }
    }

    fn publisher(authenticator: Arc<CountingAuthenticator>) -> YouTubePublisher {
        let config = Config::default();
        let http = http_client(Duration::from_secs(5)).unwrap();
        YouTubePublisher::new(&config, http, authenticator)
    }

    fn job(file_path: std::path::PathBuf) -> UploadJob {
        UploadJob {
            file_path,
            content_type: "video/mp4".to_string(),
            profile: "default".to_string(),
            metadata: VideoMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_missing_file_skips_authentication() {
        let authenticator = Arc::new(CountingAuthenticator {
            calls: AtomicUsize::new(0),
        });

        let result = publisher(authenticator.clone())
            .publish(&job("/nonexistent/video.mp4".into()))
            .await;

        assert!(matches!(result, Err(PublishError::Upload(UploadError::Source(_)))));
        assert_eq!(authenticator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_before_upload() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let file_path = temp_dir.path().join("video.mp4");
        std::fs::write(&file_path, b"frames").unwrap();
        let authenticator = Arc::new(CountingAuthenticator {
            calls: AtomicUsize::new(0),
        });

        let result = publisher(authenticator.clone()).publish(&job(file_path)).await;

        assert!(matches!(result, Err(PublishError::Auth(AuthError::Denied(_)))));
        assert_eq!(authenticator.calls.load(Ordering::SeqCst), 1);
    }
}
