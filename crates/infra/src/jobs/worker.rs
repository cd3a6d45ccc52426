//! In-process queue worker.
//!
//! Drains [`InMemoryDispatcher`] channels on a background thread. Each
//! snapshot is restored through the runner's registry (already attached to its
//! record), its body runs, and a body error is routed to the job's `failed()`
//! hook. This is the dispatcher-driven execution path; synchronous callers use
//! `JobRunner::run_now` instead.

use std::io;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use jobtrack_core::{JobCompletion, JobRecordUpdate};
use jobtrack_observability::ReportContext;

use crate::config::DEFAULT_CHANNEL;
use crate::dispatch::InMemoryDispatcher;

use super::error::JobError;
use super::runner::JobRunner;
use super::snapshot::JobSnapshot;

/// Queue worker configuration.
#[derive(Debug, Clone)]
pub struct QueueWorkerConfig {
    /// How long to sleep when every channel is empty
    pub poll_interval: Duration,
    /// Thread name, also used in logs
    pub name: String,
    /// Channels to drain, highest priority first
    pub channels: Vec<String>,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "queue-worker".to_string(),
            channels: vec![DEFAULT_CHANNEL.to_string()],
        }
    }
}

impl QueueWorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Worker runtime counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    /// Snapshots that could not be turned back into a job.
    pub jobs_rejected: u64,
    pub uptime_secs: u64,
}

/// Handle to a running worker thread.
#[derive(Debug)]
pub struct QueueWorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl QueueWorkerHandle {
    /// Stop after the job in progress (if any) and wait for the thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct QueueWorker {
    runner: JobRunner,
    queue: Arc<InMemoryDispatcher>,
}

impl QueueWorker {
    pub fn new(runner: JobRunner, queue: Arc<InMemoryDispatcher>) -> Self {
        Self { runner, queue }
    }

    /// Execute one dispatched snapshot in the current thread.
    ///
    /// A snapshot that cannot be restored fails its record (when it names one).
    /// A body error is passed to the job's `failed()` hook and then returned.
    pub fn execute_one(&self, snapshot: &JobSnapshot) -> Result<(), JobError> {
        let runner = &self.runner;
        let mut job = match runner.registry().restore(snapshot) {
            Ok(job) => job,
            Err(err) => {
                if let Some(id) = snapshot.record_id {
                    let completion =
                        JobCompletion::now(false, format!("could not restore job: {err}"));
                    runner.store().update(id, JobRecordUpdate::complete(completion))?;
                }
                return Err(err);
            }
        };

        // Attribute the job's log lines to its business record while it runs.
        let _context = runner.reporter().preserve_context();
        if let Some(related) = job.related_record() {
            runner
                .reporter()
                .set_current_context(ReportContext::for_record(related.table, related.record_id));
        }

        match job.handle(runner) {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = JobError::Job(err);
                job.failed(runner, Some(&err))?;
                Err(err)
            }
        }
    }

    /// Pull the next snapshot from `channels` and execute it.
    /// `Ok(None)` when every channel is empty.
    pub fn run_next<S: AsRef<str>>(
        &self,
        channels: &[S],
    ) -> Result<Option<Result<(), JobError>>, JobError> {
        let Some((channel, snapshot)) = self.queue.pop_any(channels)? else {
            return Ok(None);
        };
        debug!(channel = %channel, job_type = %snapshot.job_type, job_id = ?snapshot.record_id, "picked up job");
        Ok(Some(self.execute_one(&snapshot)))
    }

    /// Run the worker loop on a background thread.
    pub fn spawn(self, config: QueueWorkerConfig) -> io::Result<QueueWorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let worker_stats = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || worker_loop(self, config, shutdown_rx, worker_stats))?;

        Ok(QueueWorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn worker_loop(
    worker: QueueWorker,
    config: QueueWorkerConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    info!(worker = %config.name, channels = ?config.channels, "queue worker started");
    let started = Instant::now();

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let outcome = worker.run_next(&config.channels);

        let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
        s.uptime_secs = started.elapsed().as_secs();
        match outcome {
            Ok(Some(result)) => {
                s.jobs_processed += 1;
                match result {
                    Ok(()) => s.jobs_succeeded += 1,
                    Err(JobError::Snapshot(ref e)) => {
                        s.jobs_rejected += 1;
                        error!(worker = %config.name, error = %e, "rejected job snapshot");
                    }
                    Err(ref e) => {
                        s.jobs_failed += 1;
                        debug!(worker = %config.name, error = %e, "job execution failed");
                    }
                }
            }
            Ok(None) => {
                drop(s);
                thread::sleep(config.poll_interval);
            }
            Err(e) => {
                drop(s);
                error!(worker = %config.name, error = %e, "failed to pull from queue");
                thread::sleep(config.poll_interval);
            }
        }
    }

    info!(worker = %config.name, "queue worker stopped");
}
