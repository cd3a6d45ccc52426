//! Versioned job snapshots and the registry that turns them back into jobs.
//!
//! A snapshot carries the job's constructor arguments, never its internal
//! state or record data:
//!
//! ```json
//! { "version": 1, "job_type": "import", "record_id": "0190...", "args": { "file_id": 42 } }
//! ```
//!
//! `record_id` is set on dispatched snapshots (the worker completes that record)
//! and absent from the copy persisted in `serialized_payload`.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jobtrack_core::JobRecordId;

use super::batch::BatchJob;
use super::error::{JobError, SnapshotError};
use super::trackable::TrackableJob;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub version: u32,
    pub job_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<JobRecordId>,
    pub args: JsonValue,
}

impl JobSnapshot {
    pub fn new(
        job_type: impl Into<String>,
        record_id: Option<JobRecordId>,
        args: JsonValue,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            job_type: job_type.into(),
            record_id,
            args,
        }
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(raw)?)
    }
}

type JobFactory =
    Box<dyn Fn(&JobRegistry, JsonValue) -> Result<Box<dyn TrackableJob>, JobError> + Send + Sync>;

/// Job factories keyed by job type.
pub struct JobRegistry {
    factories: HashMap<&'static str, JobFactory>,
}

impl JobRegistry {
    /// Registry with the built-in job types (`batch`).
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_with(BatchJob::JOB_TYPE, BatchJob::restore);
        registry
    }

    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a job type whose arguments are its serde representation.
    pub fn register<J>(&mut self, job_type: &'static str) -> &mut Self
    where
        J: TrackableJob + DeserializeOwned + 'static,
    {
        self.register_with(job_type, |_, args| {
            let job: Box<dyn TrackableJob> =
                Box::new(serde_json::from_value::<J>(args).map_err(SnapshotError::from)?);
            Ok(job)
        })
    }

    /// Register a custom factory (for jobs that nest other jobs, or whose
    /// arguments differ from their fields).
    pub fn register_with<F>(&mut self, job_type: &'static str, factory: F) -> &mut Self
    where
        F: Fn(&JobRegistry, JsonValue) -> Result<Box<dyn TrackableJob>, JobError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(job_type, Box::new(factory));
        self
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.factories.contains_key(job_type)
    }

    /// Build a fresh job from a snapshot, attached to `snapshot.record_id` if set.
    pub fn restore(&self, snapshot: &JobSnapshot) -> Result<Box<dyn TrackableJob>, JobError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
            }
            .into());
        }

        let factory = self
            .factories
            .get(snapshot.job_type.as_str())
            .ok_or_else(|| SnapshotError::UnknownJobType(snapshot.job_type.clone()))?;

        let mut job = factory(self, snapshot.args.clone())?;
        if let Some(id) = snapshot.record_id {
            job.tracking_mut().attach(id);
        }
        Ok(job)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut job_types: Vec<_> = self.factories.keys().collect();
        job_types.sort();
        f.debug_struct("JobRegistry")
            .field("job_types", &job_types)
            .finish()
    }
}
