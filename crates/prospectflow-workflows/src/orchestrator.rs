//! Workflow orchestrator facade
//!
//! Wires the session store, progress tracker, state manager and error
//! handler over one set of repositories, one lock registry and one event
//! bus, and exposes the operations an HTTP layer or CLI drives a guided run
//! with.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use prospectflow_config::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::batch::{BatchControl, BatchRunner, BatchSummary, StepProgressSink};
use crate::bus::{EventBus, WorkflowEventListener};
use crate::error::{WorkflowError, WorkflowResult};
use crate::error_handler::{ErrorHandler, ErrorHandlingResult, ErrorLedger};
use crate::job::{
    BatchCounters, EnrichmentJob, EnrichmentJobRunner, EnrichmentOptions, EnrichmentProvider,
    NotificationChannel, Prospect,
};
use crate::locks::SessionLocks;
use crate::models::{
    Configuration, ErrorContext, ErrorDetails, SessionStatus, WorkflowProgress, WorkflowSession,
    WorkflowStep,
};
use crate::progress::ProgressTracker;
use crate::session_store::{SessionStore, SessionUpdate};
use crate::state::{StateManager, WorkflowState};
use crate::storage_integration::Repositories;

/// Result of [`WorkflowOrchestrator::fail_step`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailureOutcome {
    /// Progress after the failure was recorded
    pub progress: WorkflowProgress,
    /// Classification and suggested action
    pub handling: ErrorHandlingResult,
    /// Message to show the user
    pub user_message: String,
}

/// Collaborators used by an enrichment batch
#[derive(Clone)]
pub struct EnrichmentCollaborators {
    /// Enrichment and persistence services
    pub provider: Arc<dyn EnrichmentProvider>,
    /// Batch counters
    pub counters: Arc<dyn BatchCounters>,
    /// Failure notifications
    pub notifier: Arc<dyn NotificationChannel>,
}

/// Facade over every workflow component.
///
/// Each component locks a session for the duration of one call. Operations
/// here touch several components in a row, so they additionally hold an
/// operation guard for the session until the state copy is in sync.
pub struct WorkflowOrchestrator {
    config: OrchestratorConfig,
    sessions: Arc<SessionStore>,
    progress: Arc<ProgressTracker>,
    states: Arc<StateManager>,
    errors: Arc<ErrorHandler>,
    bus: EventBus,
    operations: SessionLocks,
    batches: DashMap<String, BatchControl>,
}

/// Registration of a running batch, removed when dropped
struct BatchSlot<'a> {
    batches: &'a DashMap<String, BatchControl>,
    session_id: &'a str,
}

impl Drop for BatchSlot<'_> {
    fn drop(&mut self) {
        self.batches.remove(self.session_id);
    }
}

impl WorkflowOrchestrator {
    /// Build every component over the given repositories
    pub fn new(config: OrchestratorConfig, repositories: Repositories) -> Self {
        let locks = SessionLocks::new();
        let bus = EventBus::new();
        let ledger = ErrorLedger::new(repositories.errors);

        Self {
            sessions: Arc::new(SessionStore::new(repositories.sessions, locks.clone())),
            progress: Arc::new(ProgressTracker::new(
                repositories.progress,
                locks.clone(),
                bus.clone(),
            )),
            states: Arc::new(StateManager::new(
                repositories.states,
                ledger.clone(),
                locks.clone(),
            )),
            errors: Arc::new(ErrorHandler::new(ledger, locks, config.recovery.clone())),
            bus,
            operations: SessionLocks::new(),
            batches: DashMap::new(),
            config,
        }
    }

    /// Build with the storage backend named in the configuration
    pub fn from_config(config: OrchestratorConfig) -> WorkflowResult<Self> {
        let repositories = Repositories::from_config(&config.storage)?;
        Ok(Self::new(config, repositories))
    }

    /// Configuration in use
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Session store
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Progress tracker
    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// State manager
    pub fn states(&self) -> &Arc<StateManager> {
        &self.states
    }

    /// Error handler
    pub fn errors(&self) -> &Arc<ErrorHandler> {
        &self.errors
    }

    /// Event bus
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Start a guided run: session, progress, state and an initial checkpoint
    pub async fn start_workflow(
        &self,
        user_session_id: &str,
        campaign_id: Option<String>,
        configuration: Option<Configuration>,
    ) -> WorkflowResult<WorkflowSession> {
        let configuration = configuration.unwrap_or_default();
        let session = self
            .sessions
            .create_session(user_session_id, campaign_id, None, Some(configuration.clone()))
            .await?;
        let progress = self.progress.initialize_progress(&session.id).await?;
        self.states
            .save_state(&session.id, session.clone(), progress, configuration)
            .await?;
        self.states
            .create_checkpoint(&session.id, session.current_step, "Workflow started")
            .await?;

        info!(session_id = %session.id, "Workflow started");
        Ok(session)
    }

    /// Put a step in progress; paused or finished runs start no new steps
    pub async fn begin_step(
        &self,
        session_id: &str,
        step: WorkflowStep,
    ) -> WorkflowResult<WorkflowProgress> {
        let _guard = self.operations.lock(session_id).await;
        self.begin_step_locked(session_id, step).await
    }

    async fn begin_step_locked(
        &self,
        session_id: &str,
        step: WorkflowStep,
    ) -> WorkflowResult<WorkflowProgress> {
        self.workable_session(session_id, &format!("start {}", step))
            .await?;
        let progress = self.progress.start_step(session_id, step).await?;
        self.states.update_progress(session_id, progress.clone()).await?;
        Ok(progress)
    }

    /// Report step progress
    pub async fn report_progress(
        &self,
        session_id: &str,
        step: WorkflowStep,
        percent: i64,
        message: Option<String>,
    ) -> WorkflowResult<WorkflowProgress> {
        let _guard = self.operations.lock(session_id).await;
        let progress = self
            .progress
            .update_step_progress(session_id, step, percent, message)
            .await?;
        self.states.update_progress(session_id, progress.clone()).await?;
        Ok(progress)
    }

    /// Complete a step, advance the session and checkpoint the state
    pub async fn finish_step(
        &self,
        session_id: &str,
        step: WorkflowStep,
        message: Option<String>,
    ) -> WorkflowResult<WorkflowSession> {
        let _guard = self.operations.lock(session_id).await;
        self.finish_step_locked(session_id, step, message).await
    }

    async fn finish_step_locked(
        &self,
        session_id: &str,
        step: WorkflowStep,
        message: Option<String>,
    ) -> WorkflowResult<WorkflowSession> {
        self.workable_session(session_id, &format!("finish {}", step))
            .await?;
        self.progress.complete_step(session_id, step, message).await?;
        let session = self.advance_past(session_id, step).await?;
        self.states
            .create_checkpoint(session_id, step, &format!("Completed {}", step))
            .await?;
        Ok(session)
    }

    /// Record a step failure and classify it
    pub async fn fail_step(
        &self,
        session_id: &str,
        step: WorkflowStep,
        error: impl Into<ErrorDetails>,
    ) -> WorkflowResult<StepFailureOutcome> {
        let error = error.into();
        let _guard = self.operations.lock(session_id).await;
        let progress = self
            .progress
            .fail_step(session_id, step, &error.message)
            .await?;

        let context = ErrorContext {
            error,
            ..ErrorContext::new(session_id, String::new())
        }
        .with_step(step);
        let handling = self.errors.handle_error(&context).await?;
        self.states.update_progress(session_id, progress.clone()).await?;

        Ok(StepFailureOutcome {
            user_message: handling.error_definition.user_message.clone(),
            progress,
            handling,
        })
    }

    /// Skip a step and advance the session
    pub async fn skip_step(
        &self,
        session_id: &str,
        step: WorkflowStep,
        reason: Option<String>,
    ) -> WorkflowResult<WorkflowSession> {
        let description = format!(
            "Skipped {}{}",
            step,
            reason
                .as_deref()
                .map(|r| format!(": {}", r))
                .unwrap_or_default()
        );
        let _guard = self.operations.lock(session_id).await;
        self.workable_session(session_id, &format!("skip {}", step))
            .await?;
        self.progress.skip_step(session_id, step, reason).await?;
        let session = self.advance_past(session_id, step).await?;
        self.states
            .create_checkpoint(session_id, step, &description)
            .await?;
        Ok(session)
    }

    /// Pause a run; a running enrichment batch stops starting jobs
    pub async fn pause_workflow(&self, session_id: &str) -> WorkflowResult<WorkflowSession> {
        let _guard = self.operations.lock(session_id).await;
        let session = self.sessions.pause(session_id).await?;
        if let Some(control) = self.batches.get(session_id) {
            control.pause();
        }
        self.states.update_session(session_id, session.clone()).await?;
        Ok(session)
    }

    /// Resume a paused run
    pub async fn resume_workflow(&self, session_id: &str) -> WorkflowResult<WorkflowSession> {
        let _guard = self.operations.lock(session_id).await;
        let session = self.sessions.resume(session_id).await?;
        if let Some(control) = self.batches.get(session_id) {
            control.resume();
        }
        self.states.update_session(session_id, session.clone()).await?;
        Ok(session)
    }

    /// Abandon a run and cancel its enrichment batch
    pub async fn abandon_workflow(
        &self,
        session_id: &str,
        reason: &str,
    ) -> WorkflowResult<WorkflowSession> {
        let _guard = self.operations.lock(session_id).await;
        let session = self.sessions.abandon(session_id, reason).await?;
        self.cancel_enrichment(session_id);
        self.states.update_session(session_id, session.clone()).await?;
        Ok(session)
    }

    /// Cancel the running enrichment batch of a session, if any
    pub fn cancel_enrichment(&self, session_id: &str) -> bool {
        match self.batches.get(session_id) {
            Some(control) => {
                control.cancel();
                info!(session_id = %session_id, "Enrichment batch cancelled");
                true
            }
            None => false,
        }
    }

    /// Whether an enrichment batch is registered for the session
    pub fn is_enrichment_running(&self, session_id: &str) -> bool {
        self.batches.contains_key(session_id)
    }

    /// Roll the state back to a checkpoint and move the session with it
    pub async fn restore_checkpoint(
        &self,
        session_id: &str,
        index: usize,
    ) -> WorkflowResult<WorkflowState> {
        let _guard = self.operations.lock(session_id).await;
        let state = self.states.restore_from_checkpoint(session_id, index).await?;
        self.sessions
            .update_session(
                session_id,
                SessionUpdate {
                    current_step: Some(state.session.current_step),
                    status: Some(state.session.status),
                    ..Default::default()
                },
            )
            .await?;
        Ok(state)
    }

    /// Register a progress listener for one session
    pub fn add_event_listener(
        &self,
        session_id: &str,
        listener: Arc<dyn WorkflowEventListener>,
    ) -> String {
        self.progress.add_event_listener(session_id, listener)
    }

    /// Unregister a progress listener
    pub fn remove_event_listener(&self, listener_id: &str) -> bool {
        self.progress.remove_event_listener(listener_id)
    }

    /// Enrich a batch of prospects under the `BEGIN_ENRICHMENT` step.
    ///
    /// Batch progress feeds the step. The step completes when the batch
    /// was not cancelled and at least one prospect was stored (or there was
    /// nothing to do); when every prospect failed to store, the step fails
    /// and the session enters the error status. A session paused or
    /// abandoned while the batch ran keeps the step in progress.
    pub async fn run_enrichment_batch(
        &self,
        session_id: &str,
        prospects: Vec<Prospect>,
        options: EnrichmentOptions,
        collaborators: EnrichmentCollaborators,
    ) -> WorkflowResult<BatchSummary> {
        let control = BatchControl::new();
        match self.batches.entry(session_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(WorkflowError::InvalidTransition(
                    "An enrichment batch is already running for this session".to_string(),
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(control.clone());
            }
        }
        let slot = BatchSlot {
            batches: &self.batches,
            session_id,
        };

        let session = {
            let _guard = self.operations.lock(session_id).await;
            let session = self.sessions.get_session(session_id).await?;
            if session.status != SessionStatus::Active {
                return Err(WorkflowError::InvalidTransition(format!(
                    "Cannot start enrichment while the session is {:?}",
                    session.status
                )));
            }
            self.begin_step_locked(session_id, WorkflowStep::BeginEnrichment)
                .await?;
            session
        };

        let batch_id = session.campaign_id.clone().unwrap_or_else(|| session.id.clone());
        let jobs: Vec<EnrichmentJob> = prospects
            .into_iter()
            .map(|prospect| EnrichmentJob::new(session_id, batch_id.clone(), prospect, options))
            .collect();

        let runner = Arc::new(EnrichmentJobRunner::new(
            collaborators.provider,
            collaborators.counters,
            collaborators.notifier,
            self.errors.clone(),
            Duration::from_millis(self.config.batch.stage_timeout_ms),
        ));
        let batch = BatchRunner::new(runner, &self.config.batch);
        let sink = Arc::new(StepProgressSink::new(self.progress.clone(), session_id));
        let summary = batch.run(jobs, &control, Some(sink)).await;
        drop(slot);

        let _guard = self.operations.lock(session_id).await;
        let session = self.sessions.get_session(session_id).await?;
        if !matches!(session.status, SessionStatus::Active | SessionStatus::Error) {
            info!(
                session_id = %session_id,
                status = %session.status,
                "Batch finished on an inactive session, leaving the step in progress"
            );
            self.sync_state(session_id, session).await?;
        } else if summary.total > 0 && summary.enriched == 0 && summary.failed > 0 {
            let message = format!("None of the {} prospects could be stored", summary.total);
            warn!(session_id = %session_id, "{}", message);
            self.progress
                .fail_step(session_id, WorkflowStep::BeginEnrichment, &message)
                .await?;
            let session = self.sessions.error(session_id, &message).await?;
            self.sync_state(session_id, session).await?;
        } else if summary.cancelled == 0 {
            self.finish_step_locked(
                session_id,
                WorkflowStep::BeginEnrichment,
                Some(format!(
                    "Enriched {} of {} prospects",
                    summary.enriched, summary.total
                )),
            )
            .await?;
        } else {
            self.sync_state(session_id, session).await?;
        }

        Ok(summary)
    }

    /// Advance the session past a finished step and sync the state copies
    async fn advance_past(
        &self,
        session_id: &str,
        step: WorkflowStep,
    ) -> WorkflowResult<WorkflowSession> {
        let current = self.sessions.get_session(session_id).await?;
        let session = match step.next() {
            Some(next) if current.current_step == step => {
                let session = self.sessions.advance_to_next_step(session_id, next).await?;
                if next.is_terminal() {
                    self.progress
                        .complete_step(session_id, WorkflowStep::Completed, None)
                        .await?;
                    info!(session_id = %session_id, "Workflow completed");
                }
                session
            }
            _ => current,
        };

        self.sync_state(session_id, session.clone()).await?;
        Ok(session)
    }

    /// Session that may still move through steps: active, or in error
    /// awaiting a retry
    async fn workable_session(
        &self,
        session_id: &str,
        action: &str,
    ) -> WorkflowResult<WorkflowSession> {
        let session = self.sessions.get_session(session_id).await?;
        match session.status {
            SessionStatus::Active | SessionStatus::Error => Ok(session),
            status => Err(WorkflowError::InvalidTransition(format!(
                "Cannot {} while the session is {:?}",
                action, status
            ))),
        }
    }

    /// Copy the tracker's progress and the given session into the state
    async fn sync_state(&self, session_id: &str, session: WorkflowSession) -> WorkflowResult<()> {
        let progress = self.progress.get_progress(session_id).await?;
        self.states.update_progress(session_id, progress).await?;
        self.states.update_session(session_id, session).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_catalog::API_RATE_LIMIT_EXCEEDED;
    use crate::error_catalog::RecoveryActionType;

    fn orchestrator() -> WorkflowOrchestrator {
        WorkflowOrchestrator::new(OrchestratorConfig::default(), Repositories::in_memory())
    }

    #[tokio::test]
    async fn test_start_workflow_creates_everything() {
        let orchestrator = orchestrator();
        let session = orchestrator
            .start_workflow("user-1", Some("campaign-1".to_string()), None)
            .await
            .unwrap();

        let progress = orchestrator.progress().get_progress(&session.id).await.unwrap();
        assert_eq!(progress.overall_progress, 0);

        let history = orchestrator
            .states()
            .get_workflow_history(&session.id)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].description, "Workflow started");
    }

    #[tokio::test]
    async fn test_finish_step_advances_session() {
        let orchestrator = orchestrator();
        let session = orchestrator.start_workflow("user-1", None, None).await.unwrap();

        orchestrator
            .begin_step(&session.id, WorkflowStep::UploadCsv)
            .await
            .unwrap();
        let advanced = orchestrator
            .finish_step(&session.id, WorkflowStep::UploadCsv, None)
            .await
            .unwrap();

        assert_eq!(advanced.current_step, WorkflowStep::CampaignSettings);
        assert_eq!(advanced.steps_completed, vec![WorkflowStep::UploadCsv]);

        let state = orchestrator.states().load_state(&session.id).await.unwrap();
        assert_eq!(state.session.current_step, WorkflowStep::CampaignSettings);
        assert_eq!(state.progress.overall_progress, 20);
    }

    #[tokio::test]
    async fn test_fail_step_suggests_action() {
        let orchestrator = orchestrator();
        let session = orchestrator.start_workflow("user-1", None, None).await.unwrap();

        let outcome = orchestrator
            .fail_step(&session.id, WorkflowStep::UploadCsv, "429 Too Many Requests")
            .await
            .unwrap();

        assert_eq!(outcome.handling.error_definition.code, API_RATE_LIMIT_EXCEEDED);
        assert_eq!(
            outcome.handling.suggested_action.map(|a| a.action_type),
            Some(RecoveryActionType::Retry)
        );
        let state = orchestrator.states().load_state(&session.id).await.unwrap();
        assert_eq!(state.errors.len(), 1);
        assert_eq!(
            orchestrator.sessions().get_session(&session.id).await.unwrap().status,
            SessionStatus::Active
        );
    }

    #[tokio::test]
    async fn test_paused_workflow_starts_no_steps() {
        let orchestrator = orchestrator();
        let session = orchestrator.start_workflow("user-1", None, None).await.unwrap();
        orchestrator.pause_workflow(&session.id).await.unwrap();

        let result = orchestrator
            .begin_step(&session.id, WorkflowStep::UploadCsv)
            .await;
        assert!(matches!(result, Err(WorkflowError::InvalidTransition(_))));

        orchestrator.resume_workflow(&session.id).await.unwrap();
        assert!(orchestrator
            .begin_step(&session.id, WorkflowStep::UploadCsv)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_restore_checkpoint_moves_session() {
        let orchestrator = orchestrator();
        let session = orchestrator.start_workflow("user-1", None, None).await.unwrap();
        orchestrator
            .finish_step(&session.id, WorkflowStep::UploadCsv, None)
            .await
            .unwrap();

        orchestrator.restore_checkpoint(&session.id, 0).await.unwrap();
        let restored = orchestrator.sessions().get_session(&session.id).await.unwrap();
        assert_eq!(restored.current_step, WorkflowStep::UploadCsv);
        assert_eq!(
            orchestrator
                .states()
                .get_workflow_history(&session.id)
                .await
                .unwrap()
                .len(),
            3
        );
    }
}
