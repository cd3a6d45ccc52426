//! Job runner: queueing, synchronous and nested execution, requeue/rerun.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};

use jobtrack_core::{JobRecord, JobRecordId};
use jobtrack_observability::ErrorReporter;

use crate::config::JobsConfig;
use crate::dispatch::AsyncDispatcher;
use crate::job_store::{JobRecordStore, JobStoreError};

use super::error::JobError;
use super::snapshot::{JobRegistry, JobSnapshot};
use super::trackable::{QueueAck, TrackableJob, TrackableJobExt};

/// Handed back to callers after `queue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedJob {
    pub tracking_url: String,
    pub tracking_id: JobRecordId,
}

/// Entry point for callers. Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn JobRecordStore>,
    dispatcher: Arc<dyn AsyncDispatcher>,
    reporter: ErrorReporter,
    registry: Arc<JobRegistry>,
    config: JobsConfig,
}

impl JobRunner {
    pub fn new(store: Arc<dyn JobRecordStore>, dispatcher: Arc<dyn AsyncDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            reporter: ErrorReporter::new(),
            registry: Arc::new(JobRegistry::new()),
            config: JobsConfig::default(),
        }
    }

    pub fn with_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_registry(mut self, registry: JobRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_config(mut self, config: JobsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &dyn JobRecordStore {
        self.store.as_ref()
    }

    pub fn dispatcher(&self) -> &dyn AsyncDispatcher {
        self.dispatcher.as_ref()
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    /// Queue a job for asynchronous execution.
    ///
    /// A duplicate tolerated by the job's `duplicate_already_queued` hook
    /// reports the existing record's id.
    pub fn queue<J>(&self, job: &mut J) -> Result<QueuedJob, JobError>
    where
        J: TrackableJob + ?Sized,
    {
        let tracking_id = match job.queue(self)? {
            QueueAck::Dispatched(_) => job.tracking_id()?,
            QueueAck::Duplicate(existing) => existing,
        };
        Ok(QueuedJob {
            tracking_url: self.config.tracking_url(tracking_id),
            tracking_id,
        })
    }

    pub fn is_queued<J>(&self, job: &J) -> Result<bool, JobError>
    where
        J: TrackableJob + ?Sized,
    {
        job.is_duplicate_queued(self)
    }

    /// Run a job in the current thread, bypassing the dispatcher.
    ///
    /// The record is created before the body runs. Body errors propagate as
    /// [`JobError::Job`]; nothing is marked failed on the way out.
    #[instrument(skip_all, fields(job_type = job.job_type()))]
    pub fn run_now<J>(&self, job: &mut J) -> Result<JobRecord, JobError>
    where
        J: TrackableJob + ?Sized,
    {
        let id = job.force_record_id(self)?;
        debug!(job_id = %id, "running job synchronously");

        job.handle(self).map_err(JobError::Job)?;

        self.get(id)?
            .ok_or(JobError::Store(JobStoreError::NotFound(id)))
    }

    /// `run_now` from inside another job's body. The reporter context in place
    /// before the call is restored afterwards, whatever the outcome.
    pub fn run_now_nested<J>(&self, job: &mut J) -> Result<JobRecord, JobError>
    where
        J: TrackableJob + ?Sized,
    {
        let _context = self.reporter.preserve_context();
        self.run_now(job)
    }

    pub fn get(&self, id: JobRecordId) -> Result<Option<JobRecord>, JobError> {
        Ok(self.store.find_by_id(id)?)
    }

    /// Queue a fresh copy of the job stored with record `id`. The original
    /// record is left alone; the copy gets a new one.
    pub fn requeue(&self, id: JobRecordId) -> Result<Option<QueuedJob>, JobError> {
        let Some(mut job) = self.replay(id)? else {
            return Ok(None);
        };
        let queued = self.queue(job.as_mut())?;
        info!(original = %id, job_id = %queued.tracking_id, "job requeued");
        Ok(Some(queued))
    }

    /// Like `requeue`, but runs the copy in the current thread.
    pub fn rerun_now(&self, id: JobRecordId) -> Result<Option<JobRecord>, JobError> {
        let Some(mut job) = self.replay(id)? else {
            return Ok(None);
        };
        let record = self.run_now(job.as_mut())?;
        info!(original = %id, job_id = %record.id, "job rerun");
        Ok(Some(record))
    }

    /// Restore the job stored with record `id`, attached to that record.
    /// `None` when the record or its payload is missing.
    pub fn find_job_instance(
        &self,
        id: JobRecordId,
    ) -> Result<Option<Box<dyn TrackableJob>>, JobError> {
        let Some(record) = self.store.find_by_id(id)? else {
            return Ok(None);
        };
        let Some(payload) = record.serialized_payload.as_deref() else {
            return Ok(None);
        };

        let snapshot = JobSnapshot::from_json(payload)?;
        let mut job = self.registry.restore(&snapshot)?;
        job.tracking_mut().attach(id);
        Ok(Some(job))
    }

    fn replay(&self, id: JobRecordId) -> Result<Option<Box<dyn TrackableJob>>, JobError> {
        let Some(mut job) = self.find_job_instance(id)? else {
            return Ok(None);
        };
        job.tracking_mut().reset();
        job.retrying(id);
        Ok(Some(job))
    }
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
