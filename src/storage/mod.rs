//! Local working storage for uploads in flight

pub mod workspace;

pub use workspace::{sanitize_filename, JobWorkspace, StoredFile, WorkspaceError};
