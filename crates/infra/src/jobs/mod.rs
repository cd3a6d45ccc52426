//! Trackable job execution.
//!
//! ## Components
//!
//! - `TrackableJob` / `TrackableJobExt`: a unit of work and its record bookkeeping
//! - `JobRunner`: queueing, synchronous and nested execution, requeue/rerun
//! - `BatchJob`: many jobs tracked as one, with per-member failure isolation
//! - `JobSnapshot` / `JobRegistry`: versioned snapshots and the factories that restore them
//! - `QueueWorker`: in-process consumer of the in-memory dispatcher
//!
//! ## Flow
//!
//! ```text
//! caller -> JobRunner::queue -> (dedup) -> JobRecordStore::insert -> AsyncDispatcher
//!                                                                        |
//!                    JobRecordStore::update <- job_success/job_fail <- handle()
//! ```

pub mod batch;
pub mod error;
pub mod runner;
pub mod snapshot;
pub mod trackable;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{BatchFailurePolicy, BatchJob};
pub use error::{JobError, SnapshotError};
pub use runner::{JobRunner, QueuedJob};
pub use snapshot::{JobRegistry, JobSnapshot, SNAPSHOT_VERSION};
pub use trackable::{
    FAILED_FEEDBACK, QueueAck, TrackableJob, TrackableJobExt, Tracking, report_failure,
};
pub use worker::{QueueWorker, QueueWorkerConfig, QueueWorkerHandle, WorkerStats};
