//! Resumable Upload Module
//!
//! Drives a chunked, resumable upload to completion:
//! - Tagged chunk attempts (progress, final payload, failure)
//! - Failure classification against a configurable retry policy
//! - Jittered exponential backoff between retries
//!
//! The platform side of the protocol lives in `crate::platform`.

pub mod driver;
pub mod policy;
pub mod types;

pub use driver::{AttemptOutcome, ChunkSession, UploadDriver, UploadReport};
pub use policy::{Classification, RetryPolicy, RetryState};
pub use types::*;
