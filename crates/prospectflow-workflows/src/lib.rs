#![warn(missing_docs)]

//! ProspectFlow Workflow Orchestration
//!
//! Drives a prospecting campaign through its fixed pipeline of steps with
//! session tracking, per-step progress, versioned state with checkpoints,
//! classified error recovery and batch enrichment.

pub mod batch;
pub mod bus;
pub mod error;
pub mod error_catalog;
pub mod error_handler;
pub mod job;
pub mod locks;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod session_store;
pub mod state;
pub mod storage_integration;

#[cfg(test)]
mod progress_properties;

#[cfg(test)]
mod checkpoint_properties;

#[cfg(test)]
mod error_classification_properties;

pub use batch::{BatchControl, BatchProgressSink, BatchRunner, BatchSummary, StepProgressSink};
pub use bus::{EventBus, WorkflowEvent, WorkflowEventListener, WorkflowEventType};
pub use error::*;
pub use error_catalog::{
    ErrorCatalog, ErrorCategory, ErrorDefinition, ErrorSeverity, RecoveryAction,
    RecoveryActionType,
};
pub use error_handler::{
    ErrorHandler, ErrorHandlingResult, ErrorLedger, ErrorStatistics, RecoveryOperation,
    RecoveryResult,
};
pub use job::{
    BatchCounters, EnrichmentData, EnrichmentJob, EnrichmentJobRunner, EnrichmentOptions,
    EnrichmentProvider, EnrichmentStage, FailureNotification, JobOutcome, JobProgress, JobStatus,
    NotificationChannel, Prospect, ProviderError,
};
pub use locks::SessionLocks;
pub use models::*;
pub use orchestrator::{EnrichmentCollaborators, StepFailureOutcome, WorkflowOrchestrator};
pub use progress::{ProgressSummary, ProgressTracker};
pub use session_store::{
    Pagination, SearchResult, SessionFilter, SessionStatistics, SessionStore, SessionUpdate,
    TimeRange,
};
pub use state::{
    Checkpoint, CleanupReport, HistoryEntry, StateExport, StateManager, StateSummary,
    WorkflowState,
};
pub use storage_integration::Repositories;
