//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::StorageError;

/// Errors raised around one student's progress session.
///
/// Only `Load` is ever returned to callers. Autosave and exit-save failures
/// are logged and swallowed so the student is never trapped mid-submission.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("failed to load assignment: {0}")]
    Load(#[source] StorageError),
    #[error("autosave failed: {0}")]
    Autosave(#[source] StorageError),
    #[error("final submit failed: {0}")]
    ExitSave(#[source] StorageError),
}

/// Errors emitted by `AssignmentStatusService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AssignmentStatusError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}
