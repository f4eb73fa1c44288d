//! Per-step progress tracking and the derived aggregate

use std::sync::Arc;

use chrono::Utc;
use prospectflow_persistence::Repository;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, WorkflowEvent, WorkflowEventListener, WorkflowEventType};
use crate::error::{WorkflowError, WorkflowResult};
use crate::locks::SessionLocks;
use crate::models::{StepStatus, WorkflowProgress, WorkflowStep};

/// Compact view of a session's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    /// Step the run is on
    pub current_step: WorkflowStep,
    /// Aggregate progress (0-100)
    pub overall_progress: u8,
    /// Non-terminal steps completed or skipped
    pub completed_steps: usize,
    /// Non-terminal step count
    pub total_steps: usize,
    /// Whether any step failed or recorded an error
    pub has_errors: bool,
    /// Whether the run reached the terminal step
    pub is_completed: bool,
}

/// Tracks step progress and publishes workflow events
///
/// Every mutation recomputes `overall_progress` before it is stored, so the
/// aggregate seen by readers and event subscribers always matches the table.
pub struct ProgressTracker {
    repository: Arc<dyn Repository<WorkflowProgress>>,
    locks: SessionLocks,
    bus: EventBus,
}

impl ProgressTracker {
    /// Create a tracker over a repository, sharing the given locks and bus
    pub fn new(
        repository: Arc<dyn Repository<WorkflowProgress>>,
        locks: SessionLocks,
        bus: EventBus,
    ) -> Self {
        Self {
            repository,
            locks,
            bus,
        }
    }

    /// Create the progress table of a new session
    pub async fn initialize_progress(&self, session_id: &str) -> WorkflowResult<WorkflowProgress> {
        let progress = WorkflowProgress::new(session_id);
        {
            let _guard = self.locks.lock(session_id).await;
            self.repository.save(session_id, &progress).await?;
            self.bus.publish(WorkflowEvent::new(
                WorkflowEventType::SessionCreated,
                session_id,
                Some(progress.current_step),
                json!({ "overall_progress": 0 }),
            ));
        }

        debug!(session_id = %session_id, "Initialized workflow progress");
        Ok(progress)
    }

    /// Get a session's progress
    pub async fn get_progress(&self, session_id: &str) -> WorkflowResult<WorkflowProgress> {
        self.repository
            .find(session_id)
            .await?
            .ok_or_else(|| WorkflowError::progress_not_found(session_id))
    }

    /// Put a step in progress and make it the current step
    pub async fn start_step(
        &self,
        session_id: &str,
        step: WorkflowStep,
    ) -> WorkflowResult<WorkflowProgress> {
        self.mutate(session_id, |progress| {
            let entry = progress.step_mut(step);
            if entry.status.is_done() {
                return Err(WorkflowError::InvalidTransition(format!(
                    "Step {} is already {:?}",
                    step, entry.status
                )));
            }
            entry.status = StepStatus::InProgress;
            entry.started_at.get_or_insert_with(Utc::now);
            progress.current_step = step;
            progress.recompute();

            info!(session_id = %progress.session_id, step = %step, "Step started");
            Ok(Some(WorkflowEvent::new(
                WorkflowEventType::StepStarted,
                progress.session_id.clone(),
                Some(step),
                json!({ "overall_progress": progress.overall_progress }),
            )))
        })
        .await
    }

    /// Report step progress, clamped to 0-100.
    ///
    /// Pending steps go in progress; completed and skipped steps are left
    /// untouched and publish nothing.
    pub async fn update_step_progress(
        &self,
        session_id: &str,
        step: WorkflowStep,
        percent: i64,
        message: Option<String>,
    ) -> WorkflowResult<WorkflowProgress> {
        let clamped = percent.clamp(0, 100) as u8;
        self.mutate(session_id, |progress| {
            let entry = progress.step_mut(step);
            if entry.status.is_done() {
                debug!(step = %step, "Ignoring progress update for finished step");
                return Ok(None);
            }
            if entry.status == StepStatus::Pending {
                entry.status = StepStatus::InProgress;
                entry.started_at.get_or_insert_with(Utc::now);
            }
            entry.progress = clamped;
            if message.is_some() {
                entry.message = message.clone();
            }
            progress.recompute();

            Ok(Some(WorkflowEvent::new(
                WorkflowEventType::ProgressUpdated,
                progress.session_id.clone(),
                Some(step),
                json!({
                    "progress": clamped,
                    "overall_progress": progress.overall_progress,
                    "message": message,
                }),
            )))
        })
        .await
    }

    /// Mark a step completed
    pub async fn complete_step(
        &self,
        session_id: &str,
        step: WorkflowStep,
        message: Option<String>,
    ) -> WorkflowResult<WorkflowProgress> {
        self.mutate(session_id, |progress| {
            let entry = progress.step_mut(step);
            entry.status = StepStatus::Completed;
            entry.progress = 100;
            entry.completed_at = Some(Utc::now());
            if message.is_some() {
                entry.message = message.clone();
            }
            if step.is_terminal() {
                progress.current_step = step;
            }
            progress.recompute();

            info!(
                session_id = %progress.session_id,
                step = %step,
                overall_progress = progress.overall_progress,
                "Step completed"
            );
            Ok(Some(WorkflowEvent::new(
                WorkflowEventType::StepCompleted,
                progress.session_id.clone(),
                Some(step),
                json!({
                    "overall_progress": progress.overall_progress,
                    "message": message,
                    "skipped": false,
                }),
            )))
        })
        .await
    }

    /// Mark a step failed, keeping its partial progress
    pub async fn fail_step(
        &self,
        session_id: &str,
        step: WorkflowStep,
        error_message: &str,
    ) -> WorkflowResult<WorkflowProgress> {
        self.mutate(session_id, |progress| {
            let entry = progress.step_mut(step);
            entry.status = StepStatus::Failed;
            entry.errors.push(error_message.to_string());
            entry.message = Some(error_message.to_string());
            progress.recompute();

            warn!(session_id = %progress.session_id, step = %step, "Step failed: {}", error_message);
            Ok(Some(WorkflowEvent::new(
                WorkflowEventType::StepFailed,
                progress.session_id.clone(),
                Some(step),
                json!({
                    "error": error_message,
                    "overall_progress": progress.overall_progress,
                }),
            )))
        })
        .await
    }

    /// Skip a step; it counts as fully done
    pub async fn skip_step(
        &self,
        session_id: &str,
        step: WorkflowStep,
        reason: Option<String>,
    ) -> WorkflowResult<WorkflowProgress> {
        self.mutate(session_id, |progress| {
            let entry = progress.step_mut(step);
            entry.status = StepStatus::Skipped;
            entry.progress = 100;
            entry.completed_at = Some(Utc::now());
            if reason.is_some() {
                entry.message = reason.clone();
            }
            progress.recompute();

            info!(session_id = %progress.session_id, step = %step, "Step skipped");
            Ok(Some(WorkflowEvent::new(
                WorkflowEventType::StepCompleted,
                progress.session_id.clone(),
                Some(step),
                json!({
                    "overall_progress": progress.overall_progress,
                    "skipped": true,
                    "reason": reason,
                }),
            )))
        })
        .await
    }

    /// Summary used by status endpoints
    pub async fn get_progress_summary(&self, session_id: &str) -> WorkflowResult<ProgressSummary> {
        let progress = self.get_progress(session_id).await?;
        Ok(ProgressSummary {
            current_step: progress.current_step,
            overall_progress: progress.overall_progress,
            completed_steps: progress.completed_step_count(),
            total_steps: WorkflowStep::NON_TERMINAL.len(),
            has_errors: progress.has_errors(),
            is_completed: progress.current_step.is_terminal(),
        })
    }

    /// Delete a session's progress and its listeners
    pub async fn delete_progress(&self, session_id: &str) -> WorkflowResult<bool> {
        let _guard = self.locks.lock(session_id).await;
        let deleted = self.repository.delete(session_id).await?;
        self.bus.remove_session_listeners(session_id);
        Ok(deleted)
    }

    /// Register a listener for one session's events
    pub fn add_event_listener(
        &self,
        session_id: &str,
        listener: Arc<dyn WorkflowEventListener>,
    ) -> String {
        self.bus.add_listener(session_id, listener)
    }

    /// Unregister a listener
    pub fn remove_event_listener(&self, listener_id: &str) -> bool {
        self.bus.remove_listener(listener_id)
    }

    /// Raw stream of every session's events
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.bus.subscribe()
    }

    async fn mutate<F>(&self, session_id: &str, apply: F) -> WorkflowResult<WorkflowProgress>
    where
        F: FnOnce(&mut WorkflowProgress) -> WorkflowResult<Option<WorkflowEvent>>,
    {
        let _guard = self.locks.lock(session_id).await;
        let mut progress = self.get_progress(session_id).await?;
        let event = apply(&mut progress)?;
        if let Some(event) = event {
            self.repository.save(session_id, &progress).await?;
            self.bus.publish(event);
        }
        Ok(progress)
    }
}
