//! Chunked Upload Driver
//!
//! Drives a resumable upload session to completion. Each call to
//! [`ChunkSession::next_chunk`] yields a tagged [`ChunkAttempt`]; the driver
//! classifies it and either keeps going, backs off and retries, or stops.
//!
//! - Progress is free: it never counts against the retry budget.
//! - Transport failures and retriable HTTP statuses sleep for
//!   `uniform(0, 1) * 2^retry` seconds, then re-attempt the same chunk.
//! - Any other HTTP status, or a final payload without an `id`, is fatal.

use async_trait::async_trait;
use serde_json::Value;

use super::policy::{Classification, RetryPolicy, RetryState};
use super::types::{ChunkAttempt, FailureKind, UploadError, UploadProgress};

/// A resumable upload that can push its next chunk
///
/// Implementations track the byte offset themselves, so calling
/// `next_chunk` after a failure resumes instead of restarting.
#[async_trait]
pub trait ChunkSession: Send {
    async fn next_chunk(&mut self) -> ChunkAttempt;
}

/// Classified result of one attempt
#[derive(Debug)]
pub enum AttemptOutcome {
    Progress(UploadProgress),
    Success(String),
    Retriable(String),
    Fatal(UploadError),
}

/// Summary of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Identifier assigned by the platform
    pub video_id: String,
    /// Retriable failures absorbed along the way
    pub retries: u32,
    /// Total calls to `next_chunk`
    pub sends: u32,
}

pub struct UploadDriver {
    policy: RetryPolicy,
    jitter: fn() -> f64,
}

impl UploadDriver {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            jitter: random_jitter,
        }
    }

    /// Replace the jitter source (a sampler over `[0, 1)`)
    pub fn with_jitter(mut self, jitter: fn() -> f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Classify a raw attempt
    pub fn evaluate(&self, attempt: ChunkAttempt) -> AttemptOutcome {
        match attempt {
            ChunkAttempt::Progress(progress) => AttemptOutcome::Progress(progress),
            ChunkAttempt::Complete(payload) => match extract_id(&payload) {
                Some(id) => AttemptOutcome::Success(id),
                None => AttemptOutcome::Fatal(UploadError::MalformedResponse(payload.to_string())),
            },
            ChunkAttempt::Failed(failure) => {
                match (self.policy.classify(failure.kind), failure.kind) {
                    (Classification::Retriable, FailureKind::Http { status }) => {
                        AttemptOutcome::Retriable(format!(
                            "A retriable HTTP error {} occurred:\n{}",
                            status, failure.detail
                        ))
                    }
                    (Classification::Retriable, _) => AttemptOutcome::Retriable(format!(
                        "A retriable error occurred: {}",
                        failure.detail
                    )),
                    (Classification::Fatal, FailureKind::Http { status }) => {
                        AttemptOutcome::Fatal(UploadError::NonRetriable {
                            status,
                            body: failure.detail,
                        })
                    }
                    (Classification::Fatal, _) => {
                        AttemptOutcome::Fatal(UploadError::MalformedResponse(failure.detail))
                    }
                }
            }
        }
    }

    /// Run the session until it succeeds or fails terminally
    pub async fn drive<S>(&self, session: &mut S) -> Result<UploadReport, UploadError>
    where
        S: ChunkSession + ?Sized,
    {
        let mut retry = RetryState::new(self.policy.max_retries);
        let mut sends = 0u32;

        loop {
            tracing::debug!(sends, "Uploading file...");
            sends += 1;

            let error = match self.evaluate(session.next_chunk().await) {
                AttemptOutcome::Progress(progress) => {
                    tracing::debug!(
                        bytes_sent = progress.bytes_sent,
                        total_bytes = progress.total_bytes,
                        progress = %format!("{:.1}%", progress.percent()),
                        "Chunk accepted"
                    );
                    continue;
                }
                AttemptOutcome::Success(video_id) => {
                    tracing::info!(
                        video_id = %video_id,
                        retries = retry.attempts(),
                        sends,
                        "Video was successfully uploaded"
                    );
                    return Ok(UploadReport {
                        video_id,
                        retries: retry.attempts(),
                        sends,
                    });
                }
                AttemptOutcome::Fatal(err) => {
                    tracing::error!(retries = retry.attempts(), "Upload failed: {}", err);
                    return Err(err);
                }
                AttemptOutcome::Retriable(error) => error,
            };

            tracing::warn!("{}", error);

            let Some(attempt) = retry.record_failure() else {
                tracing::error!(retries = retry.attempts(), "No longer attempting to retry");
                return Err(UploadError::RetriesExhausted {
                    retries: retry.attempts(),
                    last_error: error,
                });
            };

            let delay = self.policy.backoff_delay(attempt, (self.jitter)());
            tracing::info!(
                retry = attempt,
                max_retries = retry.max(),
                "Sleeping {:.3} seconds and then retrying...",
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn random_jitter() -> f64 {
    rand::random::<f64>()
}

fn extract_id(payload: &Value) -> Option<String> {
    match payload.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::SendFailure;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedSession {
        script: VecDeque<ChunkAttempt>,
        sends: u32,
    }

    impl ScriptedSession {
        fn new(script: impl IntoIterator<Item = ChunkAttempt>) -> Self {
            Self {
                script: script.into_iter().collect(),
                sends: 0,
            }
        }
    }

    #[async_trait]
    impl ChunkSession for ScriptedSession {
        async fn next_chunk(&mut self) -> ChunkAttempt {
            self.sends += 1;
            self.script.pop_front().expect("driver sent past the end of the script")
        }
    }

    fn progress(bytes_sent: u64) -> ChunkAttempt {
        ChunkAttempt::Progress(UploadProgress {
            bytes_sent,
            total_bytes: 1024,
        })
    }

    fn server_error() -> ChunkAttempt {
        ChunkAttempt::Failed(SendFailure::http(503, "backend unavailable"))
    }

    fn no_jitter() -> f64 {
        0.0
    }

    fn driver() -> UploadDriver {
        UploadDriver::new(RetryPolicy::default()).with_jitter(no_jitter)
    }

    #[tokio::test]
    async fn test_progress_then_success() {
        let mut session = ScriptedSession::new([
            progress(256),
            progress(512),
            progress(768),
            ChunkAttempt::Complete(json!({ "id": "dQw4w9WgXcQ", "kind": "youtube#video" })),
        ]);

        let report = driver().drive(&mut session).await.unwrap();

        assert_eq!(report.video_id, "dQw4w9WgXcQ");
        assert_eq!(report.retries, 0);
        assert_eq!(report.sends, 4);
        assert_eq!(session.sends, 4);
    }

    #[tokio::test]
    async fn test_retries_exhausted_after_eleven_failures() {
        let mut session = ScriptedSession::new((0..12).map(|_| server_error()));

        let result = driver().drive(&mut session).await;

        match result {
            Err(UploadError::RetriesExhausted { retries, last_error }) => {
                assert_eq!(retries, 10);
                assert!(last_error.contains("503"));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(session.sends, 11);
        assert_eq!(session.script.len(), 1);
    }

    #[tokio::test]
    async fn test_non_retriable_status_stops_immediately() {
        let mut session = ScriptedSession::new([
            ChunkAttempt::Failed(SendFailure::http(403, "quotaExceeded")),
            ChunkAttempt::Complete(json!({ "id": "never" })),
        ]);

        let result = driver().drive(&mut session).await;

        assert!(matches!(
            result,
            Err(UploadError::NonRetriable { status: 403, .. })
        ));
        assert_eq!(session.sends, 1);
    }

    #[tokio::test]
    async fn test_missing_id_is_malformed() {
        let mut session = ScriptedSession::new([
            ChunkAttempt::Complete(json!({ "kind": "youtube#video" })),
            ChunkAttempt::Complete(json!({ "id": "never" })),
        ]);

        let result = driver().drive(&mut session).await;

        assert!(matches!(result, Err(UploadError::MalformedResponse(_))));
        assert_eq!(session.sends, 1);
    }

    #[tokio::test]
    async fn test_protocol_failure_is_fatal() {
        let mut session = ScriptedSession::new([ChunkAttempt::Failed(SendFailure::protocol(
            "missing Location header",
        ))]);

        let result = driver().drive(&mut session).await;

        assert!(matches!(result, Err(UploadError::MalformedResponse(_))));
        assert_eq!(session.sends, 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let mut session = ScriptedSession::new([
            progress(256),
            ChunkAttempt::Failed(SendFailure::transport("connection reset by peer")),
            server_error(),
            progress(512),
            ChunkAttempt::Complete(json!({ "id": "abc123" })),
        ]);

        let report = driver().drive(&mut session).await.unwrap();

        assert_eq!(report.video_id, "abc123");
        assert_eq!(report.retries, 2);
        assert_eq!(report.sends, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_within_ceiling() {
        let mut session = ScriptedSession::new([
            server_error(),
            server_error(),
            server_error(),
            ChunkAttempt::Complete(json!({ "id": "late" })),
        ]);
        let driver = UploadDriver::new(RetryPolicy::default());

        let started = tokio::time::Instant::now();
        let report = driver.drive(&mut session).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(report.retries, 3);
        // 2 + 4 + 8 seconds is the combined ceiling of three retries
        assert!(elapsed <= Duration::from_secs(14), "slept {:?}", elapsed);
    }

    #[test]
    fn test_evaluate_numeric_id() {
        let outcome = driver().evaluate(ChunkAttempt::Complete(json!({ "id": 42 })));
        assert!(matches!(outcome, AttemptOutcome::Success(id) if id == "42"));
    }

    #[test]
    fn test_evaluate_custom_policy() {
        let driver = UploadDriver::new(RetryPolicy {
            max_retries: 1,
            retriable_status_codes: vec![429],
        });

        let throttled = driver.evaluate(ChunkAttempt::Failed(SendFailure::http(429, "slow down")));
        assert!(matches!(throttled, AttemptOutcome::Retriable(_)));

        let unavailable = driver.evaluate(server_error());
        assert!(matches!(
            unavailable,
            AttemptOutcome::Fatal(UploadError::NonRetriable { status: 503, .. })
        ));
    }
}
