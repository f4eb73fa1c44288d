//! Core data models for guided enrichment workflows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque key/value bag owned by callers
pub type Configuration = serde_json::Map<String, serde_json::Value>;

/// One stage of the fixed guided pipeline, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStep {
    /// Prospect CSV upload
    UploadCsv,
    /// Campaign name, tone and targeting
    CampaignSettings,
    /// Which enrichment sources to use
    EnrichmentConfig,
    /// Background enrichment of every prospect
    BeginEnrichment,
    /// AI email generation
    EmailGeneration,
    /// Terminal step
    Completed,
}

impl WorkflowStep {
    /// Every step, terminal step last
    pub const ALL: [WorkflowStep; 6] = [
        WorkflowStep::UploadCsv,
        WorkflowStep::CampaignSettings,
        WorkflowStep::EnrichmentConfig,
        WorkflowStep::BeginEnrichment,
        WorkflowStep::EmailGeneration,
        WorkflowStep::Completed,
    ];

    /// Steps that contribute to the aggregate progress
    pub const NON_TERMINAL: [WorkflowStep; 5] = [
        WorkflowStep::UploadCsv,
        WorkflowStep::CampaignSettings,
        WorkflowStep::EnrichmentConfig,
        WorkflowStep::BeginEnrichment,
        WorkflowStep::EmailGeneration,
    ];

    /// Wire identifier, e.g. `UPLOAD_CSV`
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::UploadCsv => "UPLOAD_CSV",
            WorkflowStep::CampaignSettings => "CAMPAIGN_SETTINGS",
            WorkflowStep::EnrichmentConfig => "ENRICHMENT_CONFIG",
            WorkflowStep::BeginEnrichment => "BEGIN_ENRICHMENT",
            WorkflowStep::EmailGeneration => "EMAIL_GENERATION",
            WorkflowStep::Completed => "COMPLETED",
        }
    }

    /// Position in the canonical order
    pub fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|step| step == self)
            .unwrap_or(Self::ALL.len() - 1)
    }

    /// Step following this one, `None` for the terminal step
    pub fn next(&self) -> Option<WorkflowStep> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Whether this is the terminal step
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStep::Completed)
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowStep::ALL
            .iter()
            .find(|step| step.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown workflow step: {}", s))
    }
}

/// Status of a guided run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Running or waiting for the next step
    Active,
    /// Paused by the user; no new steps or jobs start
    Paused,
    /// Reached the terminal step
    Completed,
    /// Given up by the user
    Abandoned,
    /// Hit an un-continuable failure
    Error,
}

impl SessionStatus {
    /// Every status
    pub const ALL: [SessionStatus; 5] = [
        SessionStatus::Active,
        SessionStatus::Paused,
        SessionStatus::Completed,
        SessionStatus::Abandoned,
        SessionStatus::Error,
    ];

    /// Wire identifier, e.g. `ACTIVE`
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Paused => "PAUSED",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Abandoned => "ABANDONED",
            SessionStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionStatus::ALL
            .iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown session status: {}", s))
    }
}

/// One guided run of the enrichment/outreach workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSession {
    /// Globally unique session identifier
    pub id: String,
    /// Owning user session
    pub user_session_id: String,
    /// Campaign being built, once known
    pub campaign_id: Option<String>,
    /// Step the run is on
    pub current_step: WorkflowStep,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Caller-owned configuration
    #[serde(default)]
    pub configuration_data: Configuration,
    /// Completed steps in completion order, without duplicates
    #[serde(default)]
    pub steps_completed: Vec<WorkflowStep>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
    /// Last error or abandonment reason
    pub error_message: Option<String>,
}

impl WorkflowSession {
    /// Record a step as completed, keeping completion order and uniqueness
    pub fn mark_step_completed(&mut self, step: WorkflowStep) {
        if !self.steps_completed.contains(&step) {
            self.steps_completed.push(step);
        }
    }

    /// Re-establish `status = Completed` ⇔ `current_step = Completed`
    pub fn normalize(&mut self) {
        if self.current_step.is_terminal() {
            self.status = SessionStatus::Completed;
        } else if self.status == SessionStatus::Completed {
            self.current_step = WorkflowStep::Completed;
        }
    }

    /// Duration between creation and the last update
    pub fn duration(&self) -> chrono::Duration {
        self.updated_at.signed_duration_since(self.created_at)
    }
}

/// Status of a single pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not started
    Pending,
    /// Running
    InProgress,
    /// Finished successfully
    Completed,
    /// Failed; may be retried
    Failed,
    /// Skipped; counts as done
    Skipped,
}

impl StepStatus {
    /// Completed and skipped steps count as fully done
    pub fn is_done(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// Progress of one pipeline step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepProgress {
    /// Step this entry describes
    pub step: WorkflowStep,
    /// Step status
    pub status: StepStatus,
    /// Step progress (0-100)
    pub progress: u8,
    /// When the step first went in progress
    pub started_at: Option<DateTime<Utc>>,
    /// When the step completed or was skipped
    pub completed_at: Option<DateTime<Utc>>,
    /// Last human-readable message
    pub message: Option<String>,
    /// Errors recorded against this step, append-only
    #[serde(default)]
    pub errors: Vec<String>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: Configuration,
}

impl StepProgress {
    /// A fresh pending entry
    pub fn pending(step: WorkflowStep) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
            progress: 0,
            started_at: None,
            completed_at: None,
            message: None,
            errors: Vec::new(),
            metadata: Configuration::new(),
        }
    }

    /// Contribution of this step to the aggregate progress
    pub fn contribution(&self) -> u32 {
        if self.status.is_done() {
            100
        } else {
            u32::from(self.progress.min(100))
        }
    }
}

/// Per-session progress table plus the derived aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProgress {
    /// Owning session
    pub session_id: String,
    /// Step the run is currently on
    pub current_step: WorkflowStep,
    /// Derived aggregate (0-100); never set directly
    pub overall_progress: u8,
    /// One entry per pipeline step, canonical order
    pub steps: Vec<StepProgress>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl WorkflowProgress {
    /// All steps pending, aggregate 0
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            current_step: WorkflowStep::UploadCsv,
            overall_progress: 0,
            steps: WorkflowStep::ALL
                .iter()
                .map(|step| StepProgress::pending(*step))
                .collect(),
            updated_at: Utc::now(),
        }
    }

    /// Entry for a step
    pub fn step(&self, step: WorkflowStep) -> Option<&StepProgress> {
        self.steps.iter().find(|entry| entry.step == step)
    }

    /// Mutable entry for a step, re-created if a stored record lost it
    pub fn step_mut(&mut self, step: WorkflowStep) -> &mut StepProgress {
        let position = match self.steps.iter().position(|entry| entry.step == step) {
            Some(position) => position,
            None => {
                self.steps.push(StepProgress::pending(step));
                self.steps.sort_by_key(|entry| entry.step.index());
                self.steps
                    .iter()
                    .position(|entry| entry.step == step)
                    .unwrap_or(self.steps.len() - 1)
            }
        };
        &mut self.steps[position]
    }

    /// Aggregate progress over the non-terminal steps.
    ///
    /// Completed or skipped steps count 100, anything else counts its own
    /// stored progress (so failed steps keep partial credit).
    pub fn calculate_overall_progress(&self) -> u8 {
        let total: u32 = WorkflowStep::NON_TERMINAL
            .iter()
            .map(|step| self.step(*step).map(StepProgress::contribution).unwrap_or(0))
            .sum();
        let count = WorkflowStep::NON_TERMINAL.len() as f64;
        (f64::from(total) / count).round().min(100.0) as u8
    }

    /// Recompute the aggregate and bump `updated_at`
    pub fn recompute(&mut self) {
        self.overall_progress = self.calculate_overall_progress();
        self.updated_at = Utc::now();
    }

    /// Number of non-terminal steps that are completed or skipped
    pub fn completed_step_count(&self) -> usize {
        WorkflowStep::NON_TERMINAL
            .iter()
            .filter(|step| self.step(**step).map(|e| e.status.is_done()).unwrap_or(false))
            .count()
    }

    /// Whether any step failed or recorded an error
    pub fn has_errors(&self) -> bool {
        self.steps
            .iter()
            .any(|entry| entry.status == StepStatus::Failed || !entry.errors.is_empty())
    }
}

/// Details of a raised error
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Raw error message
    pub message: String,
    /// Error type name, if known
    pub name: Option<String>,
    /// Explicit catalog code, if the raiser knows it
    pub code: Option<String>,
    /// Backtrace or provider response excerpt
    pub stack: Option<String>,
}

impl From<&str> for ErrorDetails {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
            ..Default::default()
        }
    }
}

impl From<String> for ErrorDetails {
    fn from(message: String) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

/// An error raised while a session was running; the unit that is logged and classified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Session the error belongs to
    pub session_id: String,
    /// Raised error
    pub error: ErrorDetails,
    /// When the error was raised
    pub timestamp: DateTime<Utc>,
    /// Step that was running, if any
    pub step: Option<WorkflowStep>,
    /// Free-form context (prospect id, provider, attempt, ...)
    #[serde(default)]
    pub metadata: Configuration,
}

impl ErrorContext {
    /// Context for a plain error message
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            error: ErrorDetails {
                message: message.into(),
                ..Default::default()
            },
            timestamp: Utc::now(),
            step: None,
            metadata: Configuration::new(),
        }
    }

    /// Attach the step that was running
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.step = Some(step);
        self
    }

    /// Attach an explicit catalog code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error.code = Some(code.into());
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order_and_next() {
        assert_eq!(WorkflowStep::UploadCsv.next(), Some(WorkflowStep::CampaignSettings));
        assert_eq!(WorkflowStep::EmailGeneration.next(), Some(WorkflowStep::Completed));
        assert_eq!(WorkflowStep::Completed.next(), None);
        assert_eq!(WorkflowStep::BeginEnrichment.index(), 3);
    }

    #[test]
    fn test_step_wire_format() {
        let json = serde_json::to_string(&WorkflowStep::BeginEnrichment).unwrap();
        assert_eq!(json, "\"BEGIN_ENRICHMENT\"");
        assert_eq!(
            "email_generation".parse::<WorkflowStep>().unwrap(),
            WorkflowStep::EmailGeneration
        );
        assert!("SEND_EMAILS".parse::<WorkflowStep>().is_err());
    }

    #[test]
    fn test_status_display_matches_serde() {
        for status in SessionStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
            assert_eq!(status.as_str().to_lowercase().parse::<SessionStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_new_progress_has_every_step_pending() {
        let progress = WorkflowProgress::new("s1");
        assert_eq!(progress.steps.len(), 6);
        assert!(progress.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(progress.overall_progress, 0);
        assert_eq!(progress.current_step, WorkflowStep::UploadCsv);
    }

    #[test]
    fn test_overall_progress_counts_failed_partial_credit() {
        let mut progress = WorkflowProgress::new("s1");
        progress.step_mut(WorkflowStep::UploadCsv).status = StepStatus::Completed;
        let config = progress.step_mut(WorkflowStep::CampaignSettings);
        config.status = StepStatus::Failed;
        config.progress = 40;

        // (100 + 40) / 5 = 28
        assert_eq!(progress.calculate_overall_progress(), 28);
    }

    #[test]
    fn test_overall_progress_ignores_terminal_step() {
        let mut progress = WorkflowProgress::new("s1");
        let terminal = progress.step_mut(WorkflowStep::Completed);
        terminal.status = StepStatus::Completed;
        terminal.progress = 100;

        assert_eq!(progress.calculate_overall_progress(), 0);
    }

    #[test]
    fn test_session_normalize() {
        let now = Utc::now();
        let mut session = WorkflowSession {
            id: "s1".to_string(),
            user_session_id: "u1".to_string(),
            campaign_id: None,
            current_step: WorkflowStep::Completed,
            status: SessionStatus::Active,
            configuration_data: Configuration::new(),
            steps_completed: vec![],
            created_at: now,
            updated_at: now,
            error_message: None,
        };

        session.normalize();
        assert_eq!(session.status, SessionStatus::Completed);

        session.current_step = WorkflowStep::UploadCsv;
        session.normalize();
        assert_eq!(session.current_step, WorkflowStep::Completed);
    }

    #[test]
    fn test_mark_step_completed_is_idempotent() {
        let now = Utc::now();
        let mut session = WorkflowSession {
            id: "s1".to_string(),
            user_session_id: "u1".to_string(),
            campaign_id: None,
            current_step: WorkflowStep::CampaignSettings,
            status: SessionStatus::Active,
            configuration_data: Configuration::new(),
            steps_completed: vec![],
            created_at: now,
            updated_at: now,
            error_message: None,
        };

        session.mark_step_completed(WorkflowStep::UploadCsv);
        session.mark_step_completed(WorkflowStep::UploadCsv);
        assert_eq!(session.steps_completed, vec![WorkflowStep::UploadCsv]);
    }
}
