//! Per-prospect enrichment jobs
//!
//! A job drives one prospect through a fixed sub-pipeline:
//!
//! ```text
//! profile lookup → company analysis → tech stack → synthesis → persistence
//! ```
//!
//! The four analysis stages are optional and fail-soft: a failure is logged
//! and the pipeline continues with no data for that stage. Persistence is
//! mandatory; its failure fails the job. Every stage runs under a timeout
//! that surfaces as an ordinary stage failure.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error_handler::ErrorHandler;
use crate::models::{ErrorContext, WorkflowStep};

/// Status reported in job progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued
    Pending,
    /// Running
    Running,
    /// Finished; the prospect was persisted
    Completed,
    /// Persistence failed
    Failed,
    /// Stopped through the cancellation token
    Cancelled,
}

impl JobStatus {
    /// Whether the job reached a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// Progress payload pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Progress (0-100)
    pub progress: u8,
    /// Items in scope
    pub total: usize,
    /// Items processed so far
    pub processed: usize,
    /// Items that failed so far
    pub failed: usize,
    /// Job status
    pub status: JobStatus,
    /// Human-readable message
    pub message: String,
    /// Item being processed
    pub current_item: Option<String>,
    /// When the job started
    pub start_time: DateTime<Utc>,
}

/// Callback receiving job progress
pub type ProgressCallback = Arc<dyn Fn(&JobProgress) + Send + Sync>;

/// Stage of the per-prospect sub-pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStage {
    /// Professional profile lookup
    ProfileLookup,
    /// Company website analysis
    CompanyAnalysis,
    /// Technology stack detection
    TechStackAnalysis,
    /// AI summary of the collected data
    Synthesis,
    /// Storing the enriched prospect
    Persistence,
}

impl EnrichmentStage {
    /// Stages in execution order
    pub const ALL: [EnrichmentStage; 5] = [
        EnrichmentStage::ProfileLookup,
        EnrichmentStage::CompanyAnalysis,
        EnrichmentStage::TechStackAnalysis,
        EnrichmentStage::Synthesis,
        EnrichmentStage::Persistence,
    ];

    /// Milestone reported when the stage starts
    pub fn start_milestone(&self) -> Option<u8> {
        match self {
            EnrichmentStage::ProfileLookup => Some(15),
            EnrichmentStage::CompanyAnalysis => Some(35),
            EnrichmentStage::TechStackAnalysis => None,
            EnrichmentStage::Synthesis => Some(75),
            EnrichmentStage::Persistence => Some(95),
        }
    }

    /// Milestone reported when the stage ends, whatever its outcome
    pub fn end_milestone(&self) -> u8 {
        match self {
            EnrichmentStage::ProfileLookup => 25,
            EnrichmentStage::CompanyAnalysis => 45,
            EnrichmentStage::TechStackAnalysis => 60,
            EnrichmentStage::Synthesis => 85,
            EnrichmentStage::Persistence => 100,
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            EnrichmentStage::ProfileLookup => "profile lookup",
            EnrichmentStage::CompanyAnalysis => "company analysis",
            EnrichmentStage::TechStackAnalysis => "tech stack analysis",
            EnrichmentStage::Synthesis => "synthesis",
            EnrichmentStage::Persistence => "persistence",
        }
    }
}

impl fmt::Display for EnrichmentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Milestone reported when a job starts
pub const JOB_STARTED_MILESTONE: u8 = 5;

/// Which optional stages to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentOptions {
    /// Run the profile lookup
    pub include_profile: bool,
    /// Run the company analysis
    pub include_company: bool,
    /// Run the tech stack analysis
    pub include_tech_stack: bool,
    /// Run the synthesis
    pub include_synthesis: bool,
}

impl Default for EnrichmentOptions {
    fn default() -> Self {
        Self {
            include_profile: true,
            include_company: true,
            include_tech_stack: true,
            include_synthesis: true,
        }
    }
}

impl EnrichmentOptions {
    fn includes(&self, stage: EnrichmentStage) -> bool {
        match stage {
            EnrichmentStage::ProfileLookup => self.include_profile,
            EnrichmentStage::CompanyAnalysis => self.include_company,
            EnrichmentStage::TechStackAnalysis => self.include_tech_stack,
            EnrichmentStage::Synthesis => self.include_synthesis,
            EnrichmentStage::Persistence => true,
        }
    }
}

/// Prospect handed to the enrichment provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prospect {
    /// Prospect id
    pub id: String,
    /// Full name
    pub name: String,
    /// Company name
    pub company: Option<String>,
    /// Professional profile URL
    pub linkedin_url: Option<String>,
    /// Company website
    pub website: Option<String>,
}

impl Prospect {
    /// Prospect with only an id and a name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            company: None,
            linkedin_url: None,
            website: None,
        }
    }
}

/// Data collected by the analysis stages; `None` when skipped or failed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentData {
    /// Profile lookup result
    pub profile: Option<Value>,
    /// Company analysis result
    pub company: Option<Value>,
    /// Tech stack result
    pub tech_stack: Option<Value>,
    /// Synthesized summary
    pub summary: Option<Value>,
}

/// Error returned by a collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    /// Raw message
    pub message: String,
    /// Catalog code, when the collaborator knows it
    pub code: Option<String>,
}

impl ProviderError {
    /// Error with a message only
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attach a catalog code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// External enrichment and persistence services
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Look up the professional profile
    async fn lookup_profile(&self, prospect: &Prospect) -> Result<Value, ProviderError>;

    /// Analyze the company website
    async fn analyze_company(&self, prospect: &Prospect) -> Result<Value, ProviderError>;

    /// Detect the company's technology stack
    async fn analyze_tech_stack(&self, prospect: &Prospect) -> Result<Value, ProviderError>;

    /// Summarize everything collected so far
    async fn synthesize(
        &self,
        prospect: &Prospect,
        data: &EnrichmentData,
    ) -> Result<Value, ProviderError>;

    /// Store the enriched prospect
    async fn persist(&self, prospect: &Prospect, data: &EnrichmentData) -> Result<(), ProviderError>;
}

/// Per-batch enriched/failed counters
#[async_trait]
pub trait BatchCounters: Send + Sync {
    /// Count one enriched prospect
    async fn increment_enriched(&self, batch_id: &str) -> Result<(), ProviderError>;

    /// Count one failed prospect
    async fn increment_failed(&self, batch_id: &str) -> Result<(), ProviderError>;
}

/// Failure pushed to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNotification {
    /// Session the job belongs to
    pub session_id: String,
    /// Batch the job belongs to
    pub batch_id: String,
    /// Failed job
    pub job_id: String,
    /// Failed prospect
    pub prospect_id: String,
    /// Classified error code
    pub error_code: String,
    /// End-user message
    pub user_message: String,
    /// Whether the error is recoverable
    pub can_recover: bool,
    /// When the failure happened
    pub timestamp: DateTime<Utc>,
}

/// Delivers failure notifications
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver one notification
    async fn notify_failure(&self, notification: FailureNotification) -> Result<(), ProviderError>;
}

/// One unit of enrichment work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentJob {
    /// Unique job id
    pub job_id: String,
    /// Session the job belongs to
    pub session_id: String,
    /// Batch the job belongs to
    pub batch_id: String,
    /// Prospect to enrich
    pub prospect: Prospect,
    /// Stage selection
    pub options: EnrichmentOptions,
}

impl EnrichmentJob {
    /// Job with a fresh id
    pub fn new(
        session_id: impl Into<String>,
        batch_id: impl Into<String>,
        prospect: Prospect,
        options: EnrichmentOptions,
    ) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            batch_id: batch_id.into(),
            prospect,
            options,
        }
    }
}

/// A fail-soft stage that did not produce data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    /// Stage that failed
    pub stage: EnrichmentStage,
    /// Failure message
    pub message: String,
}

/// Terminal result of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Job id
    pub job_id: String,
    /// Prospect id
    pub prospect_id: String,
    /// Terminal status
    pub status: JobStatus,
    /// Collected data
    pub data: EnrichmentData,
    /// Fail-soft stages that produced no data
    pub stage_failures: Vec<StageFailure>,
    /// Error that failed the job
    pub error: Option<String>,
    /// Classified code of that error
    pub error_code: Option<String>,
}

enum StageError {
    Failed(ProviderError),
    Cancelled,
}

/// Runs enrichment jobs and fires their completion and failure hooks.
///
/// Outcomes are kept for the lifetime of the runner, keyed by job id. The
/// orchestrator builds one runner per batch, so the table is bounded by the
/// batch size.
pub struct EnrichmentJobRunner {
    provider: Arc<dyn EnrichmentProvider>,
    counters: Arc<dyn BatchCounters>,
    notifier: Arc<dyn NotificationChannel>,
    error_handler: Arc<ErrorHandler>,
    stage_timeout: Duration,
    jobs: DashMap<String, Arc<OnceCell<JobOutcome>>>,
}

impl EnrichmentJobRunner {
    /// Create a runner
    pub fn new(
        provider: Arc<dyn EnrichmentProvider>,
        counters: Arc<dyn BatchCounters>,
        notifier: Arc<dyn NotificationChannel>,
        error_handler: Arc<ErrorHandler>,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            counters,
            notifier,
            error_handler,
            stage_timeout,
            jobs: DashMap::new(),
        }
    }

    /// Outcome of a job that already reached a terminal state
    pub fn outcome(&self, job_id: &str) -> Option<JobOutcome> {
        self.jobs
            .get(job_id)
            .and_then(|cell| cell.get().cloned())
    }

    /// Run one job to a terminal state.
    ///
    /// Each job id runs at most once. A caller that arrives while the job is
    /// running waits for it; a caller that arrives afterwards gets the stored
    /// outcome. Either way no hook fires a second time.
    pub async fn run(
        &self,
        job: &EnrichmentJob,
        cancel: &CancellationToken,
        on_progress: Option<ProgressCallback>,
    ) -> JobOutcome {
        let cell = self.jobs.entry(job.job_id.clone()).or_default().clone();
        if let Some(outcome) = cell.get() {
            debug!(job_id = %job.job_id, "Job already finished, skipping");
            return outcome.clone();
        }

        cell.get_or_init(|| self.execute(job, cancel, on_progress))
            .await
            .clone()
    }

    async fn execute(
        &self,
        job: &EnrichmentJob,
        cancel: &CancellationToken,
        on_progress: Option<ProgressCallback>,
    ) -> JobOutcome {
        let start_time = Utc::now();
        let report = |progress: u8, status: JobStatus, processed: usize, failed: usize, message: String| {
            if let Some(callback) = &on_progress {
                callback(&JobProgress {
                    progress,
                    total: EnrichmentStage::ALL.len(),
                    processed,
                    failed,
                    status,
                    message,
                    current_item: Some(job.prospect.id.clone()),
                    start_time,
                });
            }
        };

        info!(job_id = %job.job_id, prospect_id = %job.prospect.id, "Enrichment job started");
        report(
            JOB_STARTED_MILESTONE,
            JobStatus::Running,
            0,
            0,
            format!("Enriching {}", job.prospect.name),
        );

        let mut data = EnrichmentData::default();
        let mut stage_failures = Vec::new();
        let mut processed = 0;

        for stage in EnrichmentStage::ALL {
            if !job.options.includes(stage) {
                processed += 1;
                report(
                    stage.end_milestone(),
                    JobStatus::Running,
                    processed,
                    stage_failures.len(),
                    format!("Skipped {}", stage),
                );
                continue;
            }

            if let Some(milestone) = stage.start_milestone() {
                report(
                    milestone,
                    JobStatus::Running,
                    processed,
                    stage_failures.len(),
                    format!("Running {}", stage),
                );
            }

            let result = match stage {
                EnrichmentStage::ProfileLookup => self
                    .run_stage(stage, cancel, self.provider.lookup_profile(&job.prospect))
                    .await
                    .map(|value| data.profile = Some(value)),
                EnrichmentStage::CompanyAnalysis => self
                    .run_stage(stage, cancel, self.provider.analyze_company(&job.prospect))
                    .await
                    .map(|value| data.company = Some(value)),
                EnrichmentStage::TechStackAnalysis => self
                    .run_stage(stage, cancel, self.provider.analyze_tech_stack(&job.prospect))
                    .await
                    .map(|value| data.tech_stack = Some(value)),
                EnrichmentStage::Synthesis => {
                    let snapshot = data.clone();
                    self.run_stage(stage, cancel, self.provider.synthesize(&job.prospect, &snapshot))
                        .await
                        .map(|value| data.summary = Some(value))
                }
                EnrichmentStage::Persistence => {
                    self.run_stage(stage, cancel, self.provider.persist(&job.prospect, &data))
                        .await
                }
            };
            processed += 1;

            match result {
                Ok(()) => {
                    debug!(job_id = %job.job_id, stage = %stage, "Stage finished");
                }
                Err(StageError::Cancelled) => {
                    info!(job_id = %job.job_id, stage = %stage, "Enrichment job cancelled");
                    report(
                        stage.end_milestone().min(99),
                        JobStatus::Cancelled,
                        processed,
                        stage_failures.len(),
                        "Cancelled".to_string(),
                    );
                    return JobOutcome {
                        job_id: job.job_id.clone(),
                        prospect_id: job.prospect.id.clone(),
                        status: JobStatus::Cancelled,
                        data,
                        stage_failures,
                        error: None,
                        error_code: None,
                    };
                }
                Err(StageError::Failed(e)) if stage == EnrichmentStage::Persistence => {
                    let error_code = self.on_failure(job, stage, &e).await;
                    report(
                        stage.end_milestone(),
                        JobStatus::Failed,
                        processed,
                        stage_failures.len() + 1,
                        format!("Failed to store prospect: {}", e),
                    );
                    return JobOutcome {
                        job_id: job.job_id.clone(),
                        prospect_id: job.prospect.id.clone(),
                        status: JobStatus::Failed,
                        data,
                        stage_failures,
                        error: Some(e.message),
                        error_code: Some(error_code),
                    };
                }
                Err(StageError::Failed(e)) => {
                    warn!(
                        job_id = %job.job_id,
                        prospect_id = %job.prospect.id,
                        stage = %stage,
                        "Stage failed, continuing without its data: {}",
                        e
                    );
                    stage_failures.push(StageFailure {
                        stage,
                        message: e.message,
                    });
                }
            }

            report(
                stage.end_milestone(),
                if stage == EnrichmentStage::Persistence {
                    JobStatus::Completed
                } else {
                    JobStatus::Running
                },
                processed,
                stage_failures.len(),
                format!("Finished {}", stage),
            );
        }

        self.on_completed(job).await;
        JobOutcome {
            job_id: job.job_id.clone(),
            prospect_id: job.prospect.id.clone(),
            status: JobStatus::Completed,
            data,
            stage_failures,
            error: None,
            error_code: None,
        }
    }

    async fn run_stage<T, F>(
        &self,
        stage: EnrichmentStage,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T, StageError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StageError::Cancelled),
            result = tokio::time::timeout(self.stage_timeout, call) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(StageError::Failed(e)),
                Err(_) => Err(StageError::Failed(ProviderError::new(format!(
                    "{} timed out after {}ms",
                    stage,
                    self.stage_timeout.as_millis()
                )))),
            },
        }
    }

    async fn on_completed(&self, job: &EnrichmentJob) {
        if let Err(e) = self.counters.increment_enriched(&job.batch_id).await {
            warn!(batch_id = %job.batch_id, "Failed to update enriched counter: {}", e);
        }
        info!(job_id = %job.job_id, prospect_id = %job.prospect.id, "Enrichment job completed");
    }

    async fn on_failure(&self, job: &EnrichmentJob, stage: EnrichmentStage, e: &ProviderError) -> String {
        let mut context = ErrorContext::new(job.session_id.clone(), e.message.clone())
            .with_step(WorkflowStep::BeginEnrichment)
            .with_metadata("job_id", Value::String(job.job_id.clone()))
            .with_metadata("prospect_id", Value::String(job.prospect.id.clone()))
            .with_metadata("stage", Value::String(stage.label().to_string()));
        if let Some(code) = &e.code {
            context = context.with_code(code.clone());
        }

        let (error_code, user_message, can_recover) =
            match self.error_handler.handle_error(&context).await {
                Ok(handled) => (
                    handled.error_definition.code,
                    handled.error_definition.user_message,
                    handled.can_recover,
                ),
                Err(record_error) => {
                    warn!(job_id = %job.job_id, "Failed to record job error: {}", record_error);
                    (
                        self.error_handler.identify_error_code(&context),
                        self.error_handler.get_user_message(&context),
                        self.error_handler.is_recoverable(&context),
                    )
                }
            };

        error!(
            job_id = %job.job_id,
            prospect_id = %job.prospect.id,
            code = %error_code,
            "Enrichment job failed"
        );

        if let Err(e) = self.counters.increment_failed(&job.batch_id).await {
            warn!(batch_id = %job.batch_id, "Failed to update failed counter: {}", e);
        }

        let notification = FailureNotification {
            session_id: job.session_id.clone(),
            batch_id: job.batch_id.clone(),
            job_id: job.job_id.clone(),
            prospect_id: job.prospect.id.clone(),
            error_code: error_code.clone(),
            user_message,
            can_recover,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.notifier.notify_failure(notification).await {
            warn!(job_id = %job.job_id, "Failed to deliver failure notification: {}", e);
        }

        error_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_catalog::INSUFFICIENT_API_CREDITS;
    use crate::error_handler::ErrorLedger;
    use crate::locks::SessionLocks;
    use parking_lot::Mutex;
    use prospectflow_config::RecoveryConfig;
    use prospectflow_persistence::InMemoryRepository;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ScriptedProvider {
        fail_company: bool,
        fail_persist: bool,
        hang_tech_stack: bool,
        slow_profile: bool,
    }

    #[async_trait]
    impl EnrichmentProvider for ScriptedProvider {
        async fn lookup_profile(&self, prospect: &Prospect) -> Result<Value, ProviderError> {
            if self.slow_profile {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Ok(serde_json::json!({ "name": prospect.name }))
        }

        async fn analyze_company(&self, _prospect: &Prospect) -> Result<Value, ProviderError> {
            if self.fail_company {
                Err(ProviderError::new("website returned 503 service unavailable"))
            } else {
                Ok(serde_json::json!({ "industry": "saas" }))
            }
        }

        async fn analyze_tech_stack(&self, _prospect: &Prospect) -> Result<Value, ProviderError> {
            if self.hang_tech_stack {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(serde_json::json!(["rust"]))
        }

        async fn synthesize(
            &self,
            _prospect: &Prospect,
            data: &EnrichmentData,
        ) -> Result<Value, ProviderError> {
            Ok(serde_json::json!({ "has_company": data.company.is_some() }))
        }

        async fn persist(&self, _prospect: &Prospect, _data: &EnrichmentData) -> Result<(), ProviderError> {
            if self.fail_persist {
                Err(ProviderError::new("out of credits").with_code(INSUFFICIENT_API_CREDITS))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct Counters {
        enriched: AtomicUsize,
        failed: AtomicUsize,
    }

    #[async_trait]
    impl BatchCounters for Counters {
        async fn increment_enriched(&self, _batch_id: &str) -> Result<(), ProviderError> {
            self.enriched.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn increment_failed(&self, _batch_id: &str) -> Result<(), ProviderError> {
            self.failed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Inbox(Mutex<Vec<FailureNotification>>);

    #[async_trait]
    impl NotificationChannel for Inbox {
        async fn notify_failure(&self, notification: FailureNotification) -> Result<(), ProviderError> {
            self.0.lock().push(notification);
            Ok(())
        }
    }

    fn runner(
        provider: ScriptedProvider,
        counters: Arc<Counters>,
        inbox: Arc<Inbox>,
        timeout: Duration,
    ) -> EnrichmentJobRunner {
        let handler = ErrorHandler::new(
            ErrorLedger::new(Arc::new(InMemoryRepository::new())),
            SessionLocks::new(),
            RecoveryConfig::default(),
        );
        EnrichmentJobRunner::new(Arc::new(provider), counters, inbox, Arc::new(handler), timeout)
    }

    fn job() -> EnrichmentJob {
        EnrichmentJob::new("s1", "b1", Prospect::new("p1", "Ada"), EnrichmentOptions::default())
    }

    #[tokio::test]
    async fn test_job_reports_every_milestone() {
        let counters = Arc::new(Counters::default());
        let runner = runner(
            ScriptedProvider::default(),
            counters.clone(),
            Arc::new(Inbox::default()),
            Duration::from_secs(5),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |p: &JobProgress| sink.lock().push(p.progress));

        let outcome = runner.run(&job(), &CancellationToken::new(), Some(callback)).await;

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(
            *seen.lock(),
            vec![5, 15, 25, 35, 45, 60, 75, 85, 95, 100]
        );
        assert_eq!(counters.enriched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_analysis_failure_is_fail_soft() {
        let counters = Arc::new(Counters::default());
        let runner = runner(
            ScriptedProvider {
                fail_company: true,
                ..Default::default()
            },
            counters.clone(),
            Arc::new(Inbox::default()),
            Duration::from_secs(5),
        );

        let outcome = runner.run(&job(), &CancellationToken::new(), None).await;
        assert_eq!(outcome.status, JobStatus::Completed);
        assert!(outcome.data.company.is_none());
        assert_eq!(outcome.data.summary, Some(serde_json::json!({ "has_company": false })));
        assert_eq!(outcome.stage_failures.len(), 1);
        assert_eq!(outcome.stage_failures[0].stage, EnrichmentStage::CompanyAnalysis);
    }

    #[tokio::test]
    async fn test_stage_timeout_is_a_stage_failure() {
        let runner = runner(
            ScriptedProvider {
                hang_tech_stack: true,
                ..Default::default()
            },
            Arc::new(Counters::default()),
            Arc::new(Inbox::default()),
            Duration::from_millis(20),
        );

        let outcome = runner.run(&job(), &CancellationToken::new(), None).await;
        assert_eq!(outcome.status, JobStatus::Completed);
        assert!(outcome.stage_failures[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_persistence_failure_fails_job_once() {
        let counters = Arc::new(Counters::default());
        let inbox = Arc::new(Inbox::default());
        let runner = runner(
            ScriptedProvider {
                fail_persist: true,
                ..Default::default()
            },
            counters.clone(),
            inbox.clone(),
            Duration::from_secs(5),
        );
        let job = job();

        let outcome = runner.run(&job, &CancellationToken::new(), None).await;
        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.error_code.as_deref(), Some(INSUFFICIENT_API_CREDITS));

        // Redelivery does not fire the hooks again
        let again = runner.run(&job, &CancellationToken::new(), None).await;
        assert_eq!(again, outcome);
        assert_eq!(counters.failed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.enriched.load(Ordering::SeqCst), 0);

        let notifications = inbox.0.lock();
        assert_eq!(notifications.len(), 1);
        assert!(!notifications[0].can_recover);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deliveries_run_job_once() {
        let counters = Arc::new(Counters::default());
        let runner = Arc::new(runner(
            ScriptedProvider {
                slow_profile: true,
                ..Default::default()
            },
            counters.clone(),
            Arc::new(Inbox::default()),
            Duration::from_secs(5),
        ));
        let job = job();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let runner = runner.clone();
                let job = job.clone();
                tokio::spawn(async move { runner.run(&job, &CancellationToken::new(), None).await })
            })
            .collect();
        let outcomes: Vec<JobOutcome> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|handle| handle.unwrap())
            .collect();

        assert!(outcomes.iter().all(|o| o.status == JobStatus::Completed));
        assert_eq!(counters.enriched.load(Ordering::SeqCst), 1);
        assert_eq!(runner.outcome(&job.job_id), Some(outcomes[0].clone()));
    }

    #[tokio::test]
    async fn test_cancelled_job_fires_no_hooks() {
        let counters = Arc::new(Counters::default());
        let runner = runner(
            ScriptedProvider::default(),
            counters.clone(),
            Arc::new(Inbox::default()),
            Duration::from_secs(5),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = runner.run(&job(), &cancel, None).await;
        assert_eq!(outcome.status, JobStatus::Cancelled);
        assert_eq!(counters.enriched.load(Ordering::SeqCst), 0);
        assert_eq!(counters.failed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_milestones_are_increasing() {
        let mut last = JOB_STARTED_MILESTONE;
        for stage in EnrichmentStage::ALL {
            if let Some(start) = stage.start_milestone() {
                assert!(start > last);
                last = start;
            }
            assert!(stage.end_milestone() > last);
            last = stage.end_milestone();
        }
        assert_eq!(last, 100);
    }
}
