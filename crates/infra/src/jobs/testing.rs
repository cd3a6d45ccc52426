//! Job types and wiring shared by the job subsystem's unit tests.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use jobtrack_core::{CoreResult, JobRecord, NameTemplate, RelatedRecord};
use jobtrack_observability::ReportContext;

use crate::config::JobsConfig;
use crate::dispatch::InMemoryDispatcher;
use crate::job_store::InMemoryJobRecordStore;

use super::error::{JobError, SnapshotError};
use super::runner::JobRunner;
use super::snapshot::JobRegistry;
use super::trackable::{TrackableJob, TrackableJobExt, Tracking};

const IMPORT_NAME: NameTemplate = NameTemplate::new("import_{fileId}");

/// Deduplicated import of one file. `fail` makes the body error out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub file_id: u64,
    #[serde(default)]
    pub fail: bool,
    #[serde(skip)]
    tolerate_duplicates: bool,
    #[serde(skip)]
    context: Option<ReportContext>,
    #[serde(skip)]
    completions: Vec<(bool, String)>,
    #[serde(skip)]
    tracking: Tracking,
}

impl ImportJob {
    pub const JOB_TYPE: &'static str = "import";

    pub fn new(file_id: u64) -> Self {
        Self {
            file_id,
            fail: false,
            tolerate_duplicates: false,
            context: None,
            completions: Vec::new(),
            tracking: Tracking::default(),
        }
    }

    pub fn failing(file_id: u64) -> Self {
        Self {
            fail: true,
            ..Self::new(file_id)
        }
    }

    pub fn tolerate_duplicates(mut self) -> Self {
        self.tolerate_duplicates = true;
        self
    }

    /// Reporter context the body switches to before doing any work.
    pub fn with_context(mut self, context: ReportContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn completions(&self) -> Vec<(bool, String)> {
        self.completions.clone()
    }
}

impl TrackableJob for ImportJob {
    fn job_type(&self) -> &'static str {
        Self::JOB_TYPE
    }

    fn name(&self) -> CoreResult<String> {
        IMPORT_NAME.render(&[("fileId", &self.file_id)])
    }

    fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    fn tracking_mut(&mut self) -> &mut Tracking {
        &mut self.tracking
    }

    fn args(&self) -> Result<JsonValue, SnapshotError> {
        Ok(serde_json::to_value(self)?)
    }

    fn dedup(&self) -> bool {
        true
    }

    fn related_record(&self) -> Option<RelatedRecord> {
        Some(RelatedRecord::new("files", self.file_id))
    }

    fn duplicate_already_queued(&mut self, existing: &JobRecord) -> Result<(), JobError> {
        if self.tolerate_duplicates {
            return Ok(());
        }
        Err(JobError::AlreadyQueued {
            name: existing.name.clone(),
            existing: Some(existing.id),
        })
    }

    fn handle(&mut self, runner: &JobRunner) -> anyhow::Result<()> {
        if let Some(context) = &self.context {
            runner.reporter().set_current_context(context.clone());
        }
        if self.fail {
            anyhow::bail!("file {} is corrupt", self.file_id);
        }
        self.merge_record_data(runner, json!({ "rows": 10 }))?;
        self.job_success(runner, "imported", None)?;
        Ok(())
    }

    fn job_completed(
        &mut self,
        _runner: &JobRunner,
        success: bool,
        feedback: &str,
        _data: Option<&JsonValue>,
    ) {
        self.completions.push((success, feedback.to_string()));
    }
}

/// Runs an inner job with `run_now_nested` from inside its own body.
#[derive(Debug)]
pub struct NestingJob {
    inner: ImportJob,
    seen_after_nested: Option<ReportContext>,
    tracking: Tracking,
}

impl NestingJob {
    pub fn new(inner: ImportJob) -> Self {
        Self {
            inner,
            seen_after_nested: None,
            tracking: Tracking::default(),
        }
    }

    pub fn seen_after_nested(&self) -> Option<&ReportContext> {
        self.seen_after_nested.as_ref()
    }
}

impl TrackableJob for NestingJob {
    fn job_type(&self) -> &'static str {
        "nesting"
    }

    fn name(&self) -> CoreResult<String> {
        Ok(format!("nesting_{}", self.inner.name()?))
    }

    fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    fn tracking_mut(&mut self) -> &mut Tracking {
        &mut self.tracking
    }

    fn args(&self) -> Result<JsonValue, SnapshotError> {
        Ok(json!({ "inner": self.inner.args()? }))
    }

    fn handle(&mut self, runner: &JobRunner) -> anyhow::Result<()> {
        runner
            .reporter()
            .set_current_context(ReportContext::for_record("nesting", "outer"));
        runner.run_now_nested(&mut self.inner)?;
        self.seen_after_nested = Some(runner.reporter().current_context());
        self.job_success(runner, "nested run finished", None)?;
        Ok(())
    }
}

pub struct Harness {
    pub runner: JobRunner,
    pub store: Arc<InMemoryJobRecordStore>,
    pub queue: Arc<InMemoryDispatcher>,
}

pub fn harness() -> Harness {
    harness_with(|config| config)
}

pub fn harness_with(configure: impl FnOnce(JobsConfig) -> JobsConfig) -> Harness {
    let store = InMemoryJobRecordStore::arc();
    let queue = Arc::new(InMemoryDispatcher::new());

    let mut registry = JobRegistry::new();
    registry.register::<ImportJob>(ImportJob::JOB_TYPE);

    let runner = JobRunner::new(store.clone(), queue.clone())
        .with_registry(registry)
        .with_config(configure(JobsConfig::default()));

    Harness {
        runner,
        store,
        queue,
    }
}
