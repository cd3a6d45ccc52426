//! The trackable unit of work.
//!
//! A job moves through `UNTRACKED -> TRACKED (in flight) -> COMPLETED`. The
//! record is created either eagerly by `queue` or lazily by the first accessor
//! that needs an id (`force_record_id`, `job_success`, `job_fail`). A retry never
//! revives a completed record; it produces a new one.
//!
//! Job types implement [`TrackableJob`] (identity, arguments, body, hooks).
//! The bookkeeping lives in [`TrackableJobExt`], which every job gets for free.

use std::fmt;

use serde_json::{Value as JsonValue, json};
use tracing::{debug, info, warn};

use jobtrack_core::{
    CoreResult, JobCompletion, JobRecord, JobRecordId, JobRecordUpdate, NewJobRecord,
    RelatedRecord, merge_json,
};
use jobtrack_observability::ReportKind;

use crate::dispatch::DispatchAck;
use crate::job_store::JobStoreError;

use super::error::{JobError, SnapshotError};
use super::runner::JobRunner;
use super::snapshot::JobSnapshot;

/// Feedback written by the default failure handler.
pub const FAILED_FEEDBACK: &str = "Job failed unexpectedly";

/// Per-instance tracking state. Jobs embed one (`#[serde(skip)]`) and hand it
/// out through `tracking()` / `tracking_mut()`.
#[derive(Debug, Clone, Default)]
pub struct Tracking {
    record_id: Option<JobRecordId>,
    queued: bool,
    /// Cached record data once tracked; staged initial data before that.
    data: Option<JsonValue>,
}

impl Tracking {
    pub fn record_id(&self) -> Option<JobRecordId> {
        self.record_id
    }

    pub fn is_tracked(&self) -> bool {
        self.record_id.is_some()
    }

    pub fn is_queued(&self) -> bool {
        self.queued
    }

    /// Attach to an existing record. The data cache is dropped so reads go to the store.
    pub(crate) fn attach(&mut self, id: JobRecordId) {
        self.record_id = Some(id);
        self.data = None;
    }

    pub(crate) fn reset(&mut self) {
        *self = Tracking::default();
    }
}

/// Outcome of [`TrackableJobExt::queue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueAck {
    /// Record inserted and snapshot handed to the dispatcher.
    Dispatched(DispatchAck),
    /// A duplicate was in flight and `duplicate_already_queued` tolerated it.
    Duplicate(JobRecordId),
}

/// One schedulable unit of work.
pub trait TrackableJob: Send {
    /// Registry key used to restore snapshots of this job type.
    fn job_type(&self) -> &'static str;

    /// Resolved job name; the dedup key and the record's `name`.
    fn name(&self) -> CoreResult<String>;

    fn tracking(&self) -> &Tracking;

    fn tracking_mut(&mut self) -> &mut Tracking;

    /// Constructor arguments, persisted in snapshots for requeue/rerun.
    fn args(&self) -> Result<JsonValue, SnapshotError>;

    /// Job body.
    fn handle(&mut self, runner: &JobRunner) -> anyhow::Result<()>;

    /// At most one in-flight record per name when enabled.
    fn dedup(&self) -> bool {
        false
    }

    /// Queue channel; `None` uses the configured default.
    fn channel(&self) -> Option<&str> {
        None
    }

    fn related_record(&self) -> Option<RelatedRecord> {
        None
    }

    fn service(&self) -> Option<&str> {
        None
    }

    /// Called by `queue` when a duplicate is in flight. Returning `Ok` turns the
    /// submission into a no-op that points at the existing record.
    fn duplicate_already_queued(&mut self, existing: &JobRecord) -> Result<(), JobError> {
        Err(JobError::AlreadyQueued {
            name: existing.name.clone(),
            existing: Some(existing.id),
        })
    }

    fn job_queued(&mut self, _runner: &JobRunner) {}

    fn job_completed(
        &mut self,
        _runner: &JobRunner,
        _success: bool,
        _feedback: &str,
        _data: Option<&JsonValue>,
    ) {
    }

    /// Invoked when the body raised during dispatcher-driven execution.
    /// Overrides should finish with [`report_failure`].
    fn failed(&mut self, runner: &JobRunner, cause: Option<&JobError>) -> Result<(), JobError> {
        report_failure(self, runner, cause)
    }

    /// Runs before a requeue/rerun replays this job.
    fn retrying(&mut self, _original: JobRecordId) {}

    /// Last chance to strip bulky arguments from a snapshot.
    fn serializing(&self, _args: &mut JsonValue) {}
}

impl fmt::Debug for dyn TrackableJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackableJob")
            .field("job_type", &self.job_type())
            .field("name", &self.name().ok())
            .field("tracking", self.tracking())
            .finish()
    }
}

/// Record bookkeeping shared by every [`TrackableJob`].
pub trait TrackableJobExt: TrackableJob {
    /// Insert a record (subject to dedup) and dispatch a snapshot.
    fn queue(&mut self, runner: &JobRunner) -> Result<QueueAck, JobError> {
        if self.dedup() {
            if let Some(existing) = self.find_queued_duplicate(runner)? {
                self.duplicate_already_queued(&existing)?;
                return Ok(QueueAck::Duplicate(existing.id));
            }
        }

        let id = match self.tracking().record_id() {
            Some(id) => id,
            None => match try_insert(self, runner)? {
                Inserted::Created(id) => id,
                Inserted::Clashed {
                    existing: Some(existing),
                    ..
                } => {
                    self.duplicate_already_queued(&existing)?;
                    return Ok(QueueAck::Duplicate(existing.id));
                }
                Inserted::Clashed {
                    name,
                    existing: None,
                } => return Err(JobError::AlreadyQueued { name, existing: None }),
            },
        };

        self.tracking_mut().queued = true;
        let snapshot = self.snapshot()?;
        let channel = self
            .channel()
            .unwrap_or(runner.config().default_channel.as_str())
            .to_string();

        let ack = match runner.dispatcher().dispatch_to_queue(Some(&channel), snapshot) {
            Ok(ack) => ack,
            Err(err) => {
                warn!(job_id = %id, channel = %channel, error = %err, "dispatch failed");
                self.tracking_mut().queued = false;
                let completion = JobCompletion::now(false, format!("dispatch failed: {err}"));
                runner.store().update(id, JobRecordUpdate::complete(completion))?;
                return Err(err.into());
            }
        };

        info!(job_id = %id, channel = %ack.channel, job_type = self.job_type(), "job queued");
        self.job_queued(runner);
        Ok(QueueAck::Dispatched(ack))
    }

    fn is_duplicate_queued(&self, runner: &JobRunner) -> Result<bool, JobError> {
        Ok(self.find_queued_duplicate(runner)?.is_some())
    }

    /// In-flight record with this job's name, other than the job's own.
    ///
    /// A dedup job only sees records that were themselves inserted with
    /// dedup, the same rows its own insert would clash with in the store.
    fn find_queued_duplicate(&self, runner: &JobRunner) -> Result<Option<JobRecord>, JobError> {
        let name = self.name()?;
        let own = self.tracking().record_id();
        let existing = if self.dedup() {
            runner.store().find_unique_in_flight_by_name(&name)?
        } else {
            runner.store().find_in_flight_by_name(&name)?
        };
        Ok(existing.filter(|record| Some(record.id) != own))
    }

    /// Tracking id, inserting the record first if there is none yet.
    fn force_record_id(&mut self, runner: &JobRunner) -> Result<JobRecordId, JobError> {
        if let Some(id) = self.tracking().record_id() {
            return Ok(id);
        }
        match try_insert(self, runner)? {
            Inserted::Created(id) => Ok(id),
            Inserted::Clashed { name, existing } => Err(JobError::AlreadyQueued {
                name,
                existing: existing.map(|record| record.id),
            }),
        }
    }

    fn job_success(
        &mut self,
        runner: &JobRunner,
        feedback: &str,
        data: Option<JsonValue>,
    ) -> Result<(), JobError> {
        complete(self, runner, true, feedback, data)
    }

    fn job_fail(
        &mut self,
        runner: &JobRunner,
        feedback: &str,
        data: Option<JsonValue>,
    ) -> Result<(), JobError> {
        complete(self, runner, false, feedback, data)
    }

    fn record(&self, runner: &JobRunner) -> Result<Option<JobRecord>, JobError> {
        match self.tracking().record_id() {
            Some(id) => Ok(runner.store().find_by_id(id)?),
            None => Ok(None),
        }
    }

    /// Record data; served from the cache when present, else loaded from the store.
    fn record_data(&mut self, runner: &JobRunner) -> Result<JsonValue, JobError> {
        if let Some(data) = &self.tracking().data {
            return Ok(data.clone());
        }
        let Some(record) = self.record(runner)? else {
            return Ok(JsonValue::Null);
        };
        self.tracking_mut().data = Some(record.data.clone());
        Ok(record.data)
    }

    /// Replace the data blob. Untracked jobs stage it for the insert.
    fn update_record_data(&mut self, runner: &JobRunner, data: JsonValue) -> Result<(), JobError> {
        if let Some(id) = self.tracking().record_id() {
            runner
                .store()
                .update(id, JobRecordUpdate::replace_data(data.clone()))?;
        }
        self.tracking_mut().data = Some(data);
        Ok(())
    }

    /// Shallow-merge into the data blob. Untracked jobs stage the merge.
    fn merge_record_data(&mut self, runner: &JobRunner, partial: JsonValue) -> Result<(), JobError> {
        match self.tracking().record_id() {
            Some(id) => {
                runner.store().merge_data(id, partial.clone())?;
                if let Some(cached) = self.tracking_mut().data.as_mut() {
                    merge_json(cached, partial);
                }
            }
            None => {
                let staged = self.tracking_mut().data.get_or_insert(JsonValue::Null);
                merge_json(staged, partial);
            }
        }
        Ok(())
    }

    fn tracking_id(&self) -> Result<JobRecordId, JobError> {
        self.tracking().record_id().ok_or(JobError::Untracked)
    }

    fn tracking_url(&self, runner: &JobRunner) -> Result<String, JobError> {
        Ok(runner.config().tracking_url(self.tracking_id()?))
    }

    /// Versioned snapshot of the job's arguments. Never includes record data.
    fn snapshot(&self) -> Result<JobSnapshot, SnapshotError> {
        let mut args = self.args()?;
        self.serializing(&mut args);
        Ok(JobSnapshot::new(
            self.job_type(),
            self.tracking().record_id(),
            args,
        ))
    }
}

impl<T: TrackableJob + ?Sized> TrackableJobExt for T {}

/// Default failure handling: report the failure, then fail the record with a
/// generic message.
pub fn report_failure<J>(
    job: &mut J,
    runner: &JobRunner,
    cause: Option<&JobError>,
) -> Result<(), JobError>
where
    J: TrackableJob + ?Sized,
{
    let fields = json!({
        "job_id": job.tracking().record_id().map(|id| id.to_string()),
        "job_name": job.name().ok(),
        "job_type": job.job_type(),
        "error": cause.map(ToString::to_string),
    });
    runner.reporter().log(ReportKind::Error, "job failed", &fields);
    job.job_fail(runner, FAILED_FEEDBACK, None)
}

enum Inserted {
    Created(JobRecordId),
    Clashed {
        name: String,
        existing: Option<JobRecord>,
    },
}

fn try_insert<J>(job: &mut J, runner: &JobRunner) -> Result<Inserted, JobError>
where
    J: TrackableJob + ?Sized,
{
    let name = job.name()?;
    let serialized_payload = if runner.config().store_payloads {
        Some(job.snapshot()?.to_json()?)
    } else {
        None
    };

    let mut record = NewJobRecord::new(name.clone())
        .with_data(job.tracking().data.clone().unwrap_or(JsonValue::Null))
        .unique_in_flight(job.dedup());
    record.related = job.related_record();
    record.service = job.service().map(str::to_string);
    record.serialized_payload = serialized_payload;

    match runner.store().insert(record) {
        Ok(id) => {
            job.tracking_mut().record_id = Some(id);
            debug!(job_id = %id, job_name = %name, "job record inserted");
            Ok(Inserted::Created(id))
        }
        Err(JobStoreError::DuplicateInFlight { .. }) => {
            let existing = runner.store().find_unique_in_flight_by_name(&name)?;
            Ok(Inserted::Clashed { name, existing })
        }
        Err(err) => Err(err.into()),
    }
}

fn complete<J>(
    job: &mut J,
    runner: &JobRunner,
    success: bool,
    feedback: &str,
    data: Option<JsonValue>,
) -> Result<(), JobError>
where
    J: TrackableJob + ?Sized,
{
    let id = job.force_record_id(runner)?;
    let update =
        JobRecordUpdate::complete(JobCompletion::now(success, feedback)).with_merged_data(data.clone());
    runner.store().update(id, update)?;
    job.tracking_mut().data = None;

    debug!(job_id = %id, success, feedback, "job completed");
    job.job_completed(runner, success, feedback, data.as_ref());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::JobRecordStore;
    use crate::jobs::testing::{ImportJob, harness};
    use jobtrack_core::JobRecordStatus;

    #[test]
    fn name_comes_from_the_template() {
        assert_eq!(ImportJob::new(42).name().unwrap(), "import_42");
    }

    #[test]
    fn queue_inserts_and_dispatches() {
        let h = harness();
        let mut job = ImportJob::new(42);

        let ack = match job.queue(&h.runner).unwrap() {
            QueueAck::Dispatched(ack) => ack,
            other => panic!("expected dispatch, got {other:?}"),
        };
        assert_eq!(ack.channel, "default");
        assert!(job.tracking().is_queued());

        let id = job.tracking_id().unwrap();
        let queued = h.queue.pop("default").unwrap().unwrap();
        assert_eq!(queued.record_id, Some(id));
        assert_eq!(queued.job_type, "import");

        let record = h.store.find_by_id(id).unwrap().unwrap();
        assert_eq!(record.name, "import_42");
        assert!(record.is_in_flight());
        assert!(record.serialized_payload.is_some());
    }

    #[test]
    fn second_queue_of_same_name_is_rejected() {
        let h = harness();
        ImportJob::new(42).queue(&h.runner).unwrap();

        let err = ImportJob::new(42).queue(&h.runner).unwrap_err();
        assert!(matches!(err, JobError::AlreadyQueued { ref name, existing: Some(_) } if name == "import_42"));
        assert_eq!(h.store.records_named("import_42").unwrap().len(), 1);
        assert_eq!(h.queue.len("default").unwrap(), 1);
    }

    #[test]
    fn tolerated_duplicate_points_at_existing_record() {
        let h = harness();
        let mut first = ImportJob::new(7);
        first.queue(&h.runner).unwrap();

        let mut second = ImportJob::new(7).tolerate_duplicates();
        let ack = second.queue(&h.runner).unwrap();

        assert_eq!(ack, QueueAck::Duplicate(first.tracking_id().unwrap()));
        assert!(!second.tracking().is_tracked());
    }

    #[test]
    fn store_rejects_duplicate_when_precheck_is_skipped() {
        let h = harness();
        let mut first = ImportJob::new(42);
        first.force_record_id(&h.runner).unwrap();

        let err = ImportJob::new(42).force_record_id(&h.runner).unwrap_err();
        assert!(matches!(err, JobError::AlreadyQueued { existing, .. } if existing == first.tracking().record_id()));
    }

    #[test]
    fn non_dedup_record_with_same_name_does_not_block_queue_or_force() {
        let h = harness();
        let unrelated = h
            .store
            .insert(NewJobRecord::new("import_42"))
            .unwrap();

        let mut queued = ImportJob::new(42);
        assert!(!queued.is_duplicate_queued(&h.runner).unwrap());
        assert!(matches!(queued.queue(&h.runner).unwrap(), QueueAck::Dispatched(_)));
        assert_ne!(queued.tracking_id().unwrap(), unrelated);

        h.runner
            .store()
            .update(
                queued.tracking_id().unwrap(),
                JobRecordUpdate::complete(JobCompletion::now(true, "done")),
            )
            .unwrap();
        let mut forced = ImportJob::new(42);
        assert!(forced.force_record_id(&h.runner).is_ok());

        let err = ImportJob::new(42).queue(&h.runner).unwrap_err();
        assert!(matches!(err, JobError::AlreadyQueued { existing, .. } if existing == forced.tracking().record_id()));
    }

    #[test]
    fn completion_frees_the_name() {
        let h = harness();
        let mut job = ImportJob::new(42);
        job.queue(&h.runner).unwrap();
        assert!(ImportJob::new(42).is_duplicate_queued(&h.runner).unwrap());

        job.job_success(&h.runner, "done", None).unwrap();

        let record = job.record(&h.runner).unwrap().unwrap();
        assert!(record.completed_at.is_some());
        assert_eq!(record.success, Some(true));
        assert_eq!(record.status(), JobRecordStatus::Succeeded);
        assert!(!ImportJob::new(42).is_duplicate_queued(&h.runner).unwrap());
    }

    #[test]
    fn job_fail_inserts_lazily() {
        let h = harness();
        let mut job = ImportJob::new(3);

        job.job_fail(&h.runner, "bad input", Some(json!({"line": 12})))
            .unwrap();

        let record = job.record(&h.runner).unwrap().unwrap();
        assert_eq!(record.success, Some(false));
        assert_eq!(record.feedback.as_deref(), Some("bad input"));
        assert_eq!(record.data, json!({"line": 12}));
        assert_eq!(job.completions(), vec![(false, "bad input".to_string())]);
    }

    #[test]
    fn force_record_id_inserts_once() {
        let h = harness();
        let mut job = ImportJob::new(1);

        let a = job.force_record_id(&h.runner).unwrap();
        let b = job.force_record_id(&h.runner).unwrap();

        assert_eq!(a, b);
        assert_eq!(h.store.len().unwrap(), 1);
    }

    #[test]
    fn untracked_job_has_no_tracking_id() {
        let h = harness();
        let job = ImportJob::new(1);

        assert!(matches!(job.tracking_id(), Err(JobError::Untracked)));
        assert!(matches!(job.tracking_url(&h.runner), Err(JobError::Untracked)));
        assert!(job.record(&h.runner).unwrap().is_none());
    }

    #[test]
    fn tracking_url_uses_configured_base() {
        let h = harness();
        let mut job = ImportJob::new(1);
        let id = job.force_record_id(&h.runner).unwrap();

        assert_eq!(job.tracking_url(&h.runner).unwrap(), format!("/api/jobs/{id}"));
    }

    #[test]
    fn staged_data_lands_in_the_inserted_record() {
        let h = harness();
        let mut job = ImportJob::new(5);
        job.update_record_data(&h.runner, json!({"source": "upload"}))
            .unwrap();
        job.merge_record_data(&h.runner, json!({"size": 10})).unwrap();

        job.force_record_id(&h.runner).unwrap();

        let record = job.record(&h.runner).unwrap().unwrap();
        assert_eq!(record.data, json!({"source": "upload", "size": 10}));
    }

    #[test]
    fn data_can_change_after_completion() {
        let h = harness();
        let mut job = ImportJob::new(5);
        job.job_success(&h.runner, "done", Some(json!({"rows": 3})))
            .unwrap();

        job.merge_record_data(&h.runner, json!({"archived": true}))
            .unwrap();

        assert_eq!(
            job.record_data(&h.runner).unwrap(),
            json!({"rows": 3, "archived": true})
        );
        let record = job.record(&h.runner).unwrap().unwrap();
        assert_eq!(record.success, Some(true));
    }

    #[test]
    fn snapshot_excludes_record_data() {
        let h = harness();
        let mut job = ImportJob::new(9);
        job.update_record_data(&h.runner, json!({"blob": "x".repeat(64)}))
            .unwrap();

        let snapshot = job.snapshot().unwrap();

        assert_eq!(snapshot.args, json!({"file_id": 9, "fail": false}));
    }

    #[test]
    fn payload_storage_can_be_disabled() {
        let h = crate::jobs::testing::harness_with(|config| config.with_store_payloads(false));
        let mut job = ImportJob::new(2);
        job.queue(&h.runner).unwrap();

        let record = job.record(&h.runner).unwrap().unwrap();
        assert!(record.serialized_payload.is_none());
    }

    #[test]
    fn default_failure_handler_fails_the_record() {
        let h = harness();
        let mut job = ImportJob::new(4);
        job.force_record_id(&h.runner).unwrap();

        let cause = JobError::Job(anyhow::anyhow!("disk full"));
        job.failed(&h.runner, Some(&cause)).unwrap();

        let record = job.record(&h.runner).unwrap().unwrap();
        assert_eq!(record.success, Some(false));
        assert_eq!(record.feedback.as_deref(), Some(FAILED_FEEDBACK));
    }
}
