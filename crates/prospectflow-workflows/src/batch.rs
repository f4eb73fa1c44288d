//! Batch execution of enrichment jobs
//!
//! Jobs start one after another with a stagger delay and run concurrently up
//! to a cap. A paused batch starts no new jobs until resumed; cancelling the
//! batch token stops in-flight jobs at their next stage boundary and marks
//! the jobs that never started as cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use prospectflow_config::BatchConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job::{
    EnrichmentData, EnrichmentJob, EnrichmentJobRunner, JobOutcome, JobProgress, JobStatus,
    ProgressCallback,
};
use crate::models::WorkflowStep;
use crate::progress::ProgressTracker;

/// Pause and cancellation switches of a running batch
#[derive(Debug, Clone)]
pub struct BatchControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl BatchControl {
    /// Running, not cancelled
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(paused),
        }
    }

    /// Stop starting new jobs
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Start new jobs again
    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Cancel in-flight and pending jobs
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether new jobs are held back
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Whether the batch was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token observed by in-flight jobs
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait until the batch is not paused; false if it was cancelled instead
    pub async fn wait_until_running(&self) -> bool {
        let mut paused = self.paused.subscribe();
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if !*paused.borrow_and_update() {
                return true;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                changed = paused.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }
}

impl Default for BatchControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives aggregated batch progress
#[async_trait]
pub trait BatchProgressSink: Send + Sync {
    /// Called after every finished job
    async fn on_batch_progress(&self, progress: &JobProgress);
}

/// Feeds batch progress into the `BEGIN_ENRICHMENT` step of a session
pub struct StepProgressSink {
    tracker: Arc<ProgressTracker>,
    session_id: String,
}

impl StepProgressSink {
    /// Sink for one session
    pub fn new(tracker: Arc<ProgressTracker>, session_id: impl Into<String>) -> Self {
        Self {
            tracker,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl BatchProgressSink for StepProgressSink {
    async fn on_batch_progress(&self, progress: &JobProgress) {
        if let Err(e) = self
            .tracker
            .update_step_progress(
                &self.session_id,
                WorkflowStep::BeginEnrichment,
                i64::from(progress.progress),
                Some(progress.message.clone()),
            )
            .await
        {
            warn!(session_id = %self.session_id, "Failed to record batch progress: {}", e);
        }
    }
}

/// Aggregate result of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Jobs submitted
    pub total: usize,
    /// Jobs that persisted their prospect
    pub enriched: usize,
    /// Jobs that failed
    pub failed: usize,
    /// Jobs cancelled before or while running
    pub cancelled: usize,
    /// Per-job outcomes in submission order
    pub outcomes: Vec<JobOutcome>,
}

impl BatchSummary {
    fn from_outcomes(outcomes: Vec<JobOutcome>) -> Self {
        let count = |status: JobStatus| outcomes.iter().filter(|o| o.status == status).count();
        Self {
            total: outcomes.len(),
            enriched: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
            cancelled: count(JobStatus::Cancelled),
            outcomes,
        }
    }
}

struct Tally {
    processed: usize,
    failed: usize,
}

/// Runs a batch of jobs under a concurrency cap.
///
/// Batch-level progress goes to the [`BatchProgressSink`]; per-job
/// milestones go to the callback set with [`BatchRunner::with_job_progress`].
pub struct BatchRunner {
    runner: Arc<EnrichmentJobRunner>,
    concurrency: usize,
    inter_request_delay: Duration,
    job_progress: Option<ProgressCallback>,
}

impl BatchRunner {
    /// Create a runner from the batch configuration
    pub fn new(runner: Arc<EnrichmentJobRunner>, config: &BatchConfig) -> Self {
        Self {
            runner,
            concurrency: config.concurrency.max(1),
            inter_request_delay: Duration::from_millis(config.inter_request_delay_ms),
            job_progress: None,
        }
    }

    /// Receive the milestones of every job in the batch
    pub fn with_job_progress(mut self, callback: ProgressCallback) -> Self {
        self.job_progress = Some(callback);
        self
    }

    /// Run every job to a terminal state
    pub async fn run(
        &self,
        jobs: Vec<EnrichmentJob>,
        control: &BatchControl,
        sink: Option<Arc<dyn BatchProgressSink>>,
    ) -> BatchSummary {
        let total = jobs.len();
        let start_time = Utc::now();
        info!(
            total,
            concurrency = self.concurrency,
            "Starting enrichment batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let tally = Arc::new(Mutex::new(Tally {
            processed: 0,
            failed: 0,
        }));
        let mut handles = Vec::with_capacity(total);

        for (index, job) in jobs.into_iter().enumerate() {
            if index > 0 && !self.inter_request_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = control.cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.inter_request_delay) => {}
                }
            }

            if !control.wait_until_running().await {
                handles.push(BatchTask::NotStarted(job));
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = control.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                handles.push(BatchTask::NotStarted(job));
                continue;
            };

            let runner = self.runner.clone();
            let token = control.token();
            let tally = tally.clone();
            let sink = sink.clone();
            let job_progress = self.job_progress.clone();
            debug!(job_id = %job.job_id, "Starting enrichment job");

            let job_id = job.job_id.clone();
            let prospect_id = job.prospect.id.clone();
            let handle = tokio::spawn(async move {
                let outcome = runner.run(&job, &token, job_progress).await;
                drop(permit);

                let mut tally = tally.lock().await;
                tally.processed += 1;
                if outcome.status == JobStatus::Failed {
                    tally.failed += 1;
                }
                if let Some(sink) = sink {
                    let progress = JobProgress {
                        progress: ((tally.processed * 100) / total.max(1)).min(100) as u8,
                        total,
                        processed: tally.processed,
                        failed: tally.failed,
                        status: if tally.processed == total {
                            JobStatus::Completed
                        } else {
                            JobStatus::Running
                        },
                        message: format!("Processed {} of {} prospects", tally.processed, total),
                        current_item: Some(job.prospect.id.clone()),
                        start_time,
                    };
                    sink.on_batch_progress(&progress).await;
                }
                outcome
            });
            handles.push(BatchTask::Started {
                job_id,
                prospect_id,
                handle,
            });
        }

        let outcomes = join_all(handles.into_iter().map(BatchTask::finish)).await;
        let summary = BatchSummary::from_outcomes(outcomes);

        info!(
            total = summary.total,
            enriched = summary.enriched,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Enrichment batch finished"
        );
        summary
    }
}

enum BatchTask {
    Started {
        job_id: String,
        prospect_id: String,
        handle: tokio::task::JoinHandle<JobOutcome>,
    },
    NotStarted(EnrichmentJob),
}

impl BatchTask {
    async fn finish(self) -> JobOutcome {
        match self {
            BatchTask::Started {
                job_id,
                prospect_id,
                handle,
            } => match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(job_id = %job_id, "Enrichment job task aborted: {}", e);
                    JobOutcome {
                        job_id,
                        prospect_id,
                        status: JobStatus::Failed,
                        data: EnrichmentData::default(),
                        stage_failures: Vec::new(),
                        error: Some(e.to_string()),
                        error_code: None,
                    }
                }
            },
            BatchTask::NotStarted(job) => JobOutcome {
                job_id: job.job_id,
                prospect_id: job.prospect.id,
                status: JobStatus::Cancelled,
                data: EnrichmentData::default(),
                stage_failures: Vec::new(),
                error: None,
                error_code: None,
            },
        }
    }
}
