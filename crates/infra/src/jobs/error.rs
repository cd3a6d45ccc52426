use thiserror::Error;

use jobtrack_core::{CoreError, JobRecordId};

use crate::dispatch::DispatchError;
use crate::job_store::JobStoreError;

use super::snapshot::SNAPSHOT_VERSION;

/// Errors surfaced by the job subsystem.
#[derive(Debug, Error)]
pub enum JobError {
    /// A dedup-enabled job with the same name is still in flight.
    #[error("job `{name}` is already queued")]
    AlreadyQueued {
        name: String,
        existing: Option<JobRecordId>,
    },

    /// Tracking id/URL requested before the job has a record.
    #[error("job has no record yet")]
    Untracked,

    /// Error raised by a job body.
    #[error(transparent)]
    Job(#[from] anyhow::Error),

    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("invalid job name: {0}")]
    Name(#[from] CoreError),
}

impl JobError {
    pub fn is_already_queued(&self) -> bool {
        matches!(self, JobError::AlreadyQueued { .. })
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("job snapshot encoding failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unsupported job snapshot version {found} (expected {})", SNAPSHOT_VERSION)]
    UnsupportedVersion { found: u32 },

    #[error("no job registered for type `{0}`")]
    UnknownJobType(String),
}
