//! Infrastructure for trackable jobs: record stores, dispatchers, the job
//! runner, and configuration.
//!
//! ## Modules
//!
//! - `job_store`: `JobRecordStore` and its in-memory/Postgres implementations
//! - `dispatch`: `AsyncDispatcher` and its in-memory/Redis implementations
//! - `jobs`: `TrackableJob`, `JobRunner`, `BatchJob`, snapshots, queue worker
//! - `config`: `JobsConfig` loaded from the environment

pub mod config;
pub mod dispatch;
pub mod job_store;
pub mod jobs;

pub use config::{ConfigError, JobsConfig};
pub use dispatch::{AsyncDispatcher, DispatchAck, DispatchError, InMemoryDispatcher};
pub use job_store::{InMemoryJobRecordStore, JobRecordStore, JobStoreError, PostgresJobRecordStore};
pub use jobs::{
    BatchFailurePolicy, BatchJob, JobError, JobRegistry, JobRunner, JobSnapshot, QueuedJob,
    TrackableJob, TrackableJobExt, Tracking,
};
