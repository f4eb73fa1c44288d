//! Persisted workflow state, checkpoints and import/export

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use prospectflow_persistence::Repository;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{WorkflowError, WorkflowResult};
use crate::error_handler::ErrorLedger;
use crate::locks::SessionLocks;
use crate::models::{
    Configuration, ErrorContext, SessionStatus, WorkflowProgress, WorkflowSession, WorkflowStep,
};

/// State format version written by this build
pub const STATE_VERSION: &str = "1.0.0";

/// Default retention for [`StateManager::cleanup_old_states`]
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Snapshot captured with a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    /// Why the checkpoint was taken
    pub description: String,
    /// Step at checkpoint time
    pub step: WorkflowStep,
    /// Aggregate progress at checkpoint time
    pub progress: u8,
    /// Configuration at checkpoint time
    pub configuration: Option<Configuration>,
}

/// Entry of the append-only checkpoint log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Step the checkpoint refers to
    pub step: WorkflowStep,
    /// When it was taken
    pub timestamp: DateTime<Utc>,
    /// Captured data
    pub snapshot: CheckpointSnapshot,
}

/// Bookkeeping attached to a persisted state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    /// State format version
    pub version: String,
    /// User that created the state
    pub created_by: String,
    /// User that last modified the state
    pub last_modified_by: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
    /// Checkpoint log, oldest first
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
}

/// Resumable snapshot of a whole session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Session copy
    pub session: WorkflowSession,
    /// Progress copy
    pub progress: WorkflowProgress,
    /// Workflow configuration
    #[serde(default)]
    pub configuration: Configuration,
    /// Results of configuration validation
    #[serde(default)]
    pub validation_results: Configuration,
    /// Errors of the session, read from the ledger
    #[serde(default)]
    pub errors: Vec<ErrorContext>,
    /// Bookkeeping
    pub metadata: StateMetadata,
}

/// Entry of [`StateManager::get_workflow_history`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Checkpoint step
    pub step: WorkflowStep,
    /// Checkpoint time
    pub timestamp: DateTime<Utc>,
    /// Checkpoint description
    pub description: String,
    /// Aggregate progress at checkpoint time
    pub progress: u8,
}

/// Portable export envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateExport {
    /// Format version
    pub version: String,
    /// Export time
    pub timestamp: DateTime<Utc>,
    /// Exported session
    pub session_id: String,
    /// Exported state
    pub state: WorkflowState,
}

/// Compact view of a persisted state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSummary {
    /// Session step
    pub current_step: WorkflowStep,
    /// Aggregate progress
    pub overall_progress: u8,
    /// Checkpoints in the log
    pub checkpoint_count: usize,
    /// Errors in the ledger
    pub error_count: usize,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
    /// Whether the upload and campaign settings are filled in
    pub configuration_complete: bool,
}

/// Outcome of [`StateManager::cleanup_old_states`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// States removed
    pub deleted_count: usize,
    /// States kept
    pub remaining_count: usize,
}

fn non_empty_string(configuration: &Configuration, section: &str, key: &str) -> bool {
    configuration
        .get(section)
        .and_then(|section| section.get(key))
        .and_then(|value| value.as_str())
        .map_or(false, |value| !value.trim().is_empty())
}

/// Whether the configuration names both the uploaded file and the campaign
pub fn is_configuration_complete(configuration: &Configuration) -> bool {
    non_empty_string(configuration, "csv_upload", "file_name")
        && non_empty_string(configuration, "campaign_settings", "campaign_name")
}

/// Integrity check of a state against the data model invariants
pub fn validate_state(state: &WorkflowState) -> WorkflowResult<()> {
    let session = &state.session;

    if session.id != state.progress.session_id {
        return Err(WorkflowError::Validation(format!(
            "Progress belongs to session {} but state belongs to {}",
            state.progress.session_id, session.id
        )));
    }

    let mut seen = HashSet::new();
    if !session.steps_completed.iter().all(|step| seen.insert(*step)) {
        return Err(WorkflowError::Validation(
            "Completed steps contain duplicates".to_string(),
        ));
    }

    if (session.status == SessionStatus::Completed) != session.current_step.is_terminal() {
        return Err(WorkflowError::Validation(format!(
            "Session status {:?} does not match step {}",
            session.status, session.current_step
        )));
    }

    for step in WorkflowStep::ALL {
        let count = state.progress.steps.iter().filter(|s| s.step == step).count();
        if count != 1 {
            return Err(WorkflowError::Validation(format!(
                "Progress has {} entries for step {}",
                count, step
            )));
        }
    }

    if state
        .progress
        .steps
        .iter()
        .any(|entry| entry.progress > 100)
    {
        return Err(WorkflowError::Validation(
            "Step progress exceeds 100".to_string(),
        ));
    }

    if state.progress.overall_progress != state.progress.calculate_overall_progress() {
        return Err(WorkflowError::Validation(
            "Overall progress does not match the step table".to_string(),
        ));
    }

    Ok(())
}

/// Owns persisted workflow states and their checkpoint logs
pub struct StateManager {
    repository: Arc<dyn Repository<WorkflowState>>,
    ledger: ErrorLedger,
    locks: SessionLocks,
}

impl StateManager {
    /// Create a manager over a repository, reading errors from the shared ledger
    pub fn new(
        repository: Arc<dyn Repository<WorkflowState>>,
        ledger: ErrorLedger,
        locks: SessionLocks,
    ) -> Self {
        Self {
            repository,
            ledger,
            locks,
        }
    }

    /// Store a fresh state, replacing any previous one.
    ///
    /// Validation results, checkpoints and the session's error ledger are reset.
    pub async fn save_state(
        &self,
        session_id: &str,
        session: WorkflowSession,
        progress: WorkflowProgress,
        configuration: Configuration,
    ) -> WorkflowResult<WorkflowState> {
        let now = Utc::now();
        let user = session.user_session_id.clone();
        let state = WorkflowState {
            session,
            progress,
            configuration,
            validation_results: Configuration::new(),
            errors: Vec::new(),
            metadata: StateMetadata {
                version: STATE_VERSION.to_string(),
                created_by: user.clone(),
                last_modified_by: user,
                created_at: now,
                last_modified: now,
                checkpoints: Vec::new(),
            },
        };

        let _guard = self.locks.lock(session_id).await;
        self.ledger.clear(session_id).await?;
        self.repository.save(session_id, &state).await?;

        debug!(session_id = %session_id, "Saved workflow state");
        Ok(state)
    }

    /// Load a state, with its errors read from the ledger
    pub async fn load_state(&self, session_id: &str) -> WorkflowResult<WorkflowState> {
        let mut state = self.find_raw(session_id).await?;
        validate_state(&state)?;
        state.errors = self.ledger.history(session_id).await?;
        Ok(state)
    }

    /// Append a checkpoint for the current state
    pub async fn create_checkpoint(
        &self,
        session_id: &str,
        step: WorkflowStep,
        description: &str,
    ) -> WorkflowResult<Checkpoint> {
        let checkpoint = self
            .mutate(session_id, |state| {
                let checkpoint = Checkpoint {
                    step,
                    timestamp: Utc::now(),
                    snapshot: CheckpointSnapshot {
                        description: description.to_string(),
                        step,
                        progress: state.progress.overall_progress,
                        configuration: Some(state.configuration.clone()),
                    },
                };
                state.metadata.checkpoints.push(checkpoint.clone());
                Ok(checkpoint)
            })
            .await?;

        debug!(session_id = %session_id, step = %step, "Created checkpoint");
        Ok(checkpoint)
    }

    /// Roll the session back to a checkpoint.
    ///
    /// The log is never truncated; the restore itself is appended as a new
    /// checkpoint.
    pub async fn restore_from_checkpoint(
        &self,
        session_id: &str,
        index: usize,
    ) -> WorkflowResult<WorkflowState> {
        let mut state = self.mutate(session_id, |state| {
            let len = state.metadata.checkpoints.len();
            let checkpoint = state
                .metadata
                .checkpoints
                .get(index)
                .cloned()
                .ok_or(WorkflowError::InvalidCheckpoint { index, len })?;

            if let Some(configuration) = checkpoint.snapshot.configuration {
                state.configuration = configuration;
            }
            state.session.current_step = checkpoint.step;
            state.session.status = SessionStatus::Active;
            state.session.updated_at = Utc::now();
            state.session.normalize();

            state.metadata.checkpoints.push(Checkpoint {
                step: checkpoint.step,
                timestamp: Utc::now(),
                snapshot: CheckpointSnapshot {
                    description: format!("Restored from checkpoint {}", index),
                    step: checkpoint.step,
                    progress: state.progress.overall_progress,
                    configuration: Some(state.configuration.clone()),
                },
            });

            info!(session_id = %session_id, index, step = %checkpoint.step, "Restored checkpoint");
            Ok(state.clone())
        })
        .await?;
        state.errors = self.ledger.history(session_id).await?;
        Ok(state)
    }

    /// Checkpoint log as history entries
    pub async fn get_workflow_history(&self, session_id: &str) -> WorkflowResult<Vec<HistoryEntry>> {
        let state = self.find_raw(session_id).await?;
        Ok(state
            .metadata
            .checkpoints
            .into_iter()
            .map(|checkpoint| HistoryEntry {
                step: checkpoint.step,
                timestamp: checkpoint.timestamp,
                description: checkpoint.snapshot.description,
                progress: checkpoint.snapshot.progress,
            })
            .collect())
    }

    /// Shallow-merge keys into the configuration
    pub async fn update_configuration(
        &self,
        session_id: &str,
        updates: Configuration,
    ) -> WorkflowResult<Configuration> {
        self.mutate(session_id, |state| {
            state.configuration.extend(updates);
            Ok(state.configuration.clone())
        })
        .await
    }

    /// Replace the embedded progress copy
    pub async fn update_progress(
        &self,
        session_id: &str,
        progress: WorkflowProgress,
    ) -> WorkflowResult<()> {
        self.mutate(session_id, |state| {
            state.progress = progress;
            Ok(())
        })
        .await
    }

    /// Replace the embedded session copy
    pub async fn update_session(
        &self,
        session_id: &str,
        session: WorkflowSession,
    ) -> WorkflowResult<()> {
        self.mutate(session_id, |state| {
            state.metadata.last_modified_by = session.user_session_id.clone();
            state.session = session;
            Ok(())
        })
        .await
    }

    /// Append an error to the session's ledger
    pub async fn add_error(&self, session_id: &str, context: ErrorContext) -> WorkflowResult<usize> {
        let _guard = self.locks.lock(session_id).await;
        if !self.repository.exists(session_id).await? {
            return Err(WorkflowError::state_not_found(session_id));
        }
        let context = ErrorContext {
            session_id: session_id.to_string(),
            ..context
        };
        self.ledger.append(&context).await
    }

    /// Clear the session's ledger
    pub async fn clear_errors(&self, session_id: &str) -> WorkflowResult<()> {
        let _guard = self.locks.lock(session_id).await;
        self.ledger.clear(session_id).await
    }

    /// Serialize a state to the portable export format
    pub async fn export_state(&self, session_id: &str) -> WorkflowResult<String> {
        let state = self.load_state(session_id).await?;
        let export = StateExport {
            version: STATE_VERSION.to_string(),
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            state,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Import an exported state under a (possibly different) session id.
    ///
    /// Nothing is written unless the payload parses, carries the current
    /// version and passes validation.
    pub async fn import_state(
        &self,
        session_id: &str,
        serialized: &str,
    ) -> WorkflowResult<WorkflowState> {
        let raw: serde_json::Value = serde_json::from_str(serialized)?;
        let version = raw
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if version != STATE_VERSION {
            return Err(WorkflowError::IncompatibleVersion {
                expected: STATE_VERSION.to_string(),
                found: version,
            });
        }

        let export: StateExport = serde_json::from_value(raw)?;
        let mut state = export.state;
        state.session.id = session_id.to_string();
        state.progress.session_id = session_id.to_string();
        for error in &mut state.errors {
            error.session_id = session_id.to_string();
        }
        state.metadata.last_modified = Utc::now();
        validate_state(&state)?;

        let errors = std::mem::take(&mut state.errors);
        {
            let _guard = self.locks.lock(session_id).await;
            self.repository.save(session_id, &state).await?;
            self.ledger.replace(session_id, errors.clone()).await?;
        }

        info!(
            session_id = %session_id,
            source_session_id = %export.session_id,
            "Imported workflow state"
        );
        state.errors = errors;
        Ok(state)
    }

    /// Compact view of a state
    pub async fn get_state_summary(&self, session_id: &str) -> WorkflowResult<StateSummary> {
        let state = self.find_raw(session_id).await?;
        let error_count = self.ledger.history(session_id).await?.len();
        Ok(StateSummary {
            current_step: state.session.current_step,
            overall_progress: state.progress.overall_progress,
            checkpoint_count: state.metadata.checkpoints.len(),
            error_count,
            last_modified: state.metadata.last_modified,
            configuration_complete: is_configuration_complete(&state.configuration),
        })
    }

    /// Delete states whose session was last updated before the cutoff
    pub async fn cleanup_old_states(&self, older_than_days: u32) -> WorkflowResult<CleanupReport> {
        let cutoff = Utc::now() - Duration::days(i64::from(older_than_days));
        let states = self.repository.list_entries().await?;
        let total = states.len();

        let mut deleted_count = 0;
        for (key, state) in states {
            if state.session.updated_at < cutoff {
                let _guard = self.locks.lock(&key).await;
                if self.repository.delete(&key).await? {
                    self.ledger.clear(&key).await?;
                    deleted_count += 1;
                }
            }
        }

        info!(deleted_count, older_than_days, "Cleaned up old workflow states");
        Ok(CleanupReport {
            deleted_count,
            remaining_count: total - deleted_count,
        })
    }

    /// Delete a state and its ledger
    pub async fn delete_state(&self, session_id: &str) -> WorkflowResult<bool> {
        let _guard = self.locks.lock(session_id).await;
        let deleted = self.repository.delete(session_id).await?;
        self.ledger.clear(session_id).await?;
        Ok(deleted)
    }

    /// Stored state without validation or ledger errors
    async fn find_raw(&self, session_id: &str) -> WorkflowResult<WorkflowState> {
        self.repository
            .find(session_id)
            .await?
            .ok_or_else(|| WorkflowError::state_not_found(session_id))
    }

    async fn mutate<F, R>(&self, session_id: &str, apply: F) -> WorkflowResult<R>
    where
        F: FnOnce(&mut WorkflowState) -> WorkflowResult<R>,
    {
        let _guard = self.locks.lock(session_id).await;
        let mut state = self.find_raw(session_id).await?;
        let result = apply(&mut state)?;
        state.metadata.last_modified = Utc::now();
        self.repository.save(session_id, &state).await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospectflow_persistence::InMemoryRepository;
    use serde_json::json;

    fn manager() -> StateManager {
        StateManager::new(
            Arc::new(InMemoryRepository::new()),
            ErrorLedger::new(Arc::new(InMemoryRepository::new())),
            SessionLocks::new(),
        )
    }

    fn session(id: &str) -> WorkflowSession {
        let now = Utc::now();
        WorkflowSession {
            id: id.to_string(),
            user_session_id: "user-1".to_string(),
            campaign_id: None,
            current_step: WorkflowStep::UploadCsv,
            status: SessionStatus::Active,
            configuration_data: Configuration::new(),
            steps_completed: vec![],
            created_at: now,
            updated_at: now,
            error_message: None,
        }
    }

    async fn saved(manager: &StateManager, id: &str) -> WorkflowState {
        manager
            .save_state(id, session(id), WorkflowProgress::new(id), Configuration::new())
            .await
            .unwrap()
    }

    fn config(value: serde_json::Value) -> Configuration {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load_state() {
        let manager = manager();
        let state = saved(&manager, "s1").await;

        assert_eq!(state.metadata.version, STATE_VERSION);
        assert_eq!(state.metadata.created_by, "user-1");
        assert_eq!(manager.load_state("s1").await.unwrap(), state);
        assert!(matches!(
            manager.load_state("missing").await,
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_state_clears_ledger() {
        let manager = manager();
        saved(&manager, "s1").await;
        manager
            .add_error("s1", ErrorContext::new("s1", "boom"))
            .await
            .unwrap();
        assert_eq!(manager.load_state("s1").await.unwrap().errors.len(), 1);

        saved(&manager, "s1").await;
        assert!(manager.load_state("s1").await.unwrap().errors.is_empty());
    }

    #[tokio::test]
    async fn test_restore_appends_checkpoint() {
        let manager = manager();
        saved(&manager, "s1").await;
        manager
            .update_configuration("s1", config(json!({"tone": "formal"})))
            .await
            .unwrap();
        manager
            .create_checkpoint("s1", WorkflowStep::CampaignSettings, "settings saved")
            .await
            .unwrap();
        manager
            .update_configuration("s1", config(json!({"tone": "casual"})))
            .await
            .unwrap();

        let restored = manager.restore_from_checkpoint("s1", 0).await.unwrap();
        assert_eq!(restored.configuration["tone"], "formal");
        assert_eq!(restored.session.current_step, WorkflowStep::CampaignSettings);
        assert_eq!(restored.metadata.checkpoints.len(), 2);
        assert_eq!(
            restored.metadata.checkpoints[1].snapshot.description,
            "Restored from checkpoint 0"
        );
    }

    #[tokio::test]
    async fn test_restore_rejects_out_of_range_index() {
        let manager = manager();
        saved(&manager, "s1").await;

        let result = manager.restore_from_checkpoint("s1", 0).await;
        assert!(matches!(
            result,
            Err(WorkflowError::InvalidCheckpoint { index: 0, len: 0 })
        ));
    }

    #[tokio::test]
    async fn test_workflow_history() {
        let manager = manager();
        saved(&manager, "s1").await;
        manager
            .create_checkpoint("s1", WorkflowStep::UploadCsv, "uploaded")
            .await
            .unwrap();

        let history = manager.get_workflow_history("s1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].description, "uploaded");
        assert_eq!(history[0].progress, 0);
    }

    #[tokio::test]
    async fn test_export_import_under_new_id() {
        let manager = manager();
        saved(&manager, "s1").await;
        manager
            .add_error("s1", ErrorContext::new("s1", "timeout"))
            .await
            .unwrap();

        let exported = manager.export_state("s1").await.unwrap();
        let imported = manager.import_state("s2", &exported).await.unwrap();

        assert_eq!(imported.session.id, "s2");
        assert_eq!(imported.progress.session_id, "s2");
        let loaded = manager.load_state("s2").await.unwrap();
        assert_eq!(loaded.errors.len(), 1);
        assert_eq!(loaded.errors[0].session_id, "s2");
    }

    #[tokio::test]
    async fn test_import_rejects_other_version_without_mutation() {
        let manager = manager();
        saved(&manager, "s1").await;
        let before = manager.load_state("s1").await.unwrap();

        let exported = manager.export_state("s1").await.unwrap();
        let mut payload: serde_json::Value = serde_json::from_str(&exported).unwrap();
        payload["version"] = json!("2.0.0");

        let result = manager.import_state("s1", &payload.to_string()).await;
        assert!(matches!(result, Err(WorkflowError::IncompatibleVersion { .. })));
        assert_eq!(manager.load_state("s1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_state_summary_configuration_complete() {
        let manager = manager();
        saved(&manager, "s1").await;
        assert!(!manager.get_state_summary("s1").await.unwrap().configuration_complete);

        manager
            .update_configuration(
                "s1",
                config(json!({
                    "csv_upload": {"file_name": "leads.csv"},
                    "campaign_settings": {"campaign_name": "Q3 outreach"}
                })),
            )
            .await
            .unwrap();
        let summary = manager.get_state_summary("s1").await.unwrap();
        assert!(summary.configuration_complete);
        assert_eq!(summary.checkpoint_count, 0);
    }

    #[tokio::test]
    async fn test_cleanup_old_states() {
        let manager = manager();
        let mut old = session("old");
        old.updated_at = Utc::now() - Duration::days(45);
        manager
            .save_state("old", old, WorkflowProgress::new("old"), Configuration::new())
            .await
            .unwrap();
        saved(&manager, "fresh").await;

        let report = manager
            .cleanup_old_states(DEFAULT_RETENTION_DAYS)
            .await
            .unwrap();
        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.remaining_count, 1);
        assert!(manager.load_state("old").await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_deletes_by_storage_key() {
        let manager = manager();
        let mut copy = session("original");
        copy.updated_at = Utc::now() - Duration::days(45);
        manager
            .save_state(
                "archive-1",
                copy,
                WorkflowProgress::new("original"),
                Configuration::new(),
            )
            .await
            .unwrap();

        let report = manager
            .cleanup_old_states(DEFAULT_RETENTION_DAYS)
            .await
            .unwrap();
        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.remaining_count, 0);
        assert!(matches!(
            manager.get_state_summary("archive-1").await,
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[test]
    fn test_validate_state_rejects_mismatched_progress() {
        let now = Utc::now();
        let state = WorkflowState {
            session: session("s1"),
            progress: WorkflowProgress::new("other"),
            configuration: Configuration::new(),
            validation_results: Configuration::new(),
            errors: vec![],
            metadata: StateMetadata {
                version: STATE_VERSION.to_string(),
                created_by: "u".to_string(),
                last_modified_by: "u".to_string(),
                created_at: now,
                last_modified: now,
                checkpoints: vec![],
            },
        };
        assert!(matches!(
            validate_state(&state),
            Err(WorkflowError::Validation(_))
        ));
    }
}
