//! A batch of jobs tracked as one unit.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::warn;

use jobtrack_core::CoreResult;

use super::error::{JobError, SnapshotError};
use super::runner::JobRunner;
use super::snapshot::{JobRegistry, JobSnapshot};
use super::trackable::{TrackableJob, TrackableJobExt, Tracking, report_failure};

/// Outcome of a batch whose members failed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailurePolicy {
    /// The batch succeeds once every member was attempted.
    #[default]
    AlwaysSucceed,
    /// The batch fails if any member failed.
    FailIfAnyMemberFails,
}

impl BatchFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchFailurePolicy::AlwaysSucceed => "always_succeed",
            BatchFailurePolicy::FailIfAnyMemberFails => "fail_if_any_member_fails",
        }
    }
}

impl fmt::Display for BatchFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always_succeed" => Ok(BatchFailurePolicy::AlwaysSucceed),
            "fail_if_any_member_fails" => Ok(BatchFailurePolicy::FailIfAnyMemberFails),
            other => Err(format!(
                "unknown batch failure policy `{other}` (expected always_succeed or fail_if_any_member_fails)"
            )),
        }
    }
}

/// Runs its members in order, isolating member failures.
///
/// Every member's record is created before the first member runs, so each
/// member has a tracking id even if the batch is cut short.
pub struct BatchJob {
    name: String,
    members: Vec<Box<dyn TrackableJob>>,
    /// `None` defers to the runner's configured policy.
    policy: Option<BatchFailurePolicy>,
    tracking: Tracking,
}

#[derive(Deserialize)]
struct BatchArgs {
    name: String,
    #[serde(default)]
    policy: Option<BatchFailurePolicy>,
    members: Vec<JobSnapshot>,
}

impl BatchJob {
    pub const JOB_TYPE: &'static str = "batch";

    pub fn new(name: impl Into<String>, members: Vec<Box<dyn TrackableJob>>) -> Self {
        Self {
            name: name.into(),
            members,
            policy: None,
            tracking: Tracking::default(),
        }
    }

    pub fn with_policy(mut self, policy: BatchFailurePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn push(&mut self, member: Box<dyn TrackableJob>) {
        self.members.push(member);
    }

    pub fn members(&self) -> &[Box<dyn TrackableJob>] {
        &self.members
    }

    /// Registry factory; members are restored through the same registry.
    pub fn restore(
        registry: &JobRegistry,
        args: JsonValue,
    ) -> Result<Box<dyn TrackableJob>, JobError> {
        let args: BatchArgs = serde_json::from_value(args).map_err(SnapshotError::from)?;
        let members = args
            .members
            .iter()
            .map(|snapshot| registry.restore(snapshot))
            .collect::<Result<Vec<_>, _>>()?;

        let batch: Box<dyn TrackableJob> = Box::new(BatchJob {
            name: args.name,
            members,
            policy: args.policy,
            tracking: Tracking::default(),
        });
        Ok(batch)
    }
}

impl TrackableJob for BatchJob {
    fn job_type(&self) -> &'static str {
        Self::JOB_TYPE
    }

    fn name(&self) -> CoreResult<String> {
        Ok(self.name.clone())
    }

    fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    fn tracking_mut(&mut self) -> &mut Tracking {
        &mut self.tracking
    }

    fn args(&self) -> Result<JsonValue, SnapshotError> {
        let members = self
            .members
            .iter()
            .map(|member| {
                member.snapshot().map(|snapshot| JobSnapshot {
                    record_id: None,
                    ..snapshot
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(json!({
            "name": self.name,
            "policy": self.policy,
            "members": members,
        }))
    }

    fn handle(&mut self, runner: &JobRunner) -> anyhow::Result<()> {
        for member in &mut self.members {
            member.force_record_id(runner)?;
        }

        let total = self.members.len();
        let mut failed = 0usize;
        for member in &mut self.members {
            if let Err(err) = runner.run_now(member.as_mut()) {
                failed += 1;
                warn!(
                    batch = %self.name,
                    job_id = ?member.tracking().record_id(),
                    error = %err,
                    "batch member failed"
                );
                if let Err(hook_err) = member.failed(runner, Some(&err)) {
                    warn!(
                        batch = %self.name,
                        job_id = ?member.tracking().record_id(),
                        error = %hook_err,
                        "batch member failure hook errored"
                    );
                }
            }
        }

        let policy = self
            .policy
            .unwrap_or(runner.config().batch_failure_policy);
        let data = json!({ "processed": total, "failed": failed });

        if failed > 0 && policy == BatchFailurePolicy::FailIfAnyMemberFails {
            let feedback = format!("Processed {total} jobs, {failed} failed");
            self.job_fail(runner, &feedback, Some(data))?;
        } else {
            let feedback = match failed {
                0 => format!("Processed {total} jobs"),
                _ => format!("Processed {total} jobs, {failed} failed"),
            };
            self.job_success(runner, &feedback, Some(data))?;
        }
        Ok(())
    }

    /// Fails every member, then the batch itself. A member whose hook errors
    /// does not stop the others; the first such error is returned after the
    /// batch record is completed.
    fn failed(&mut self, runner: &JobRunner, cause: Option<&JobError>) -> Result<(), JobError> {
        let mut first_err = None;
        for member in &mut self.members {
            if let Err(err) = member.failed(runner, cause) {
                warn!(
                    batch = %self.name,
                    job_id = ?member.tracking().record_id(),
                    error = %err,
                    "could not fail batch member"
                );
                first_err.get_or_insert(err);
            }
        }
        report_failure(self, runner, cause)?;
        first_err.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for BatchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchJob")
            .field("name", &self.name)
            .field("members", &self.members.len())
            .field("policy", &self.policy)
            .field("tracking", &self.tracking)
            .finish()
    }
}
