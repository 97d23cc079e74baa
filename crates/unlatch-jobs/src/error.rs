use thiserror::Error;
use unlatch_storage::StorageError;

use crate::job::JobStatus;

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job has no source location")]
    MissingSource,

    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),

    #[error("listing source failed: {0}")]
    Listing(#[source] StorageError),

    #[error("resolving destination failed: {0}")]
    Destination(#[source] StorageError),

    #[error("job initialization not finished after {attempts} polls")]
    InitTimeout { attempts: u32 },

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("cancelled by caller")]
    Cancelled,

    #[error("no failed files to retry")]
    NothingToRetry,

    #[error("artifact not available: {0}")]
    ArtifactUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
