//! Integration with prospectflow-persistence for workflow aggregates

use std::path::Path;
use std::sync::Arc;

use prospectflow_config::{StorageBackend, StorageConfig};
use prospectflow_persistence::{InMemoryRepository, JsonFileRepository, Repository};
use tracing::info;

use crate::error::WorkflowResult;
use crate::models::{ErrorContext, WorkflowProgress, WorkflowSession};
use crate::state::WorkflowState;

/// One repository per workflow aggregate, all keyed by session id
#[derive(Clone)]
pub struct Repositories {
    /// Session records
    pub sessions: Arc<dyn Repository<WorkflowSession>>,
    /// Progress tables
    pub progress: Arc<dyn Repository<WorkflowProgress>>,
    /// Persisted states
    pub states: Arc<dyn Repository<WorkflowState>>,
    /// Error ledgers
    pub errors: Arc<dyn Repository<Vec<ErrorContext>>>,
}

impl Repositories {
    /// Process-local repositories
    pub fn in_memory() -> Self {
        Self {
            sessions: Arc::new(InMemoryRepository::new()),
            progress: Arc::new(InMemoryRepository::new()),
            states: Arc::new(InMemoryRepository::new()),
            errors: Arc::new(InMemoryRepository::new()),
        }
    }

    /// JSON file repositories under `data_dir`, one subdirectory per aggregate
    pub fn on_disk(data_dir: &Path) -> WorkflowResult<Self> {
        let repositories = Self {
            sessions: Arc::new(JsonFileRepository::new(data_dir.join("sessions"))?),
            progress: Arc::new(JsonFileRepository::new(data_dir.join("progress"))?),
            states: Arc::new(JsonFileRepository::new(data_dir.join("states"))?),
            errors: Arc::new(JsonFileRepository::new(data_dir.join("errors"))?),
        };
        info!(data_dir = %data_dir.display(), "Using file storage");
        Ok(repositories)
    }

    /// Repositories for the configured backend
    pub fn from_config(config: &StorageConfig) -> WorkflowResult<Self> {
        match config.backend {
            StorageBackend::Memory => Ok(Self::in_memory()),
            StorageBackend::File => Self::on_disk(&config.data_dir),
        }
    }
}
