//! Core configuration types and data structures

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Storage backend configuration
    pub storage: StorageConfig,
    /// Automated recovery timing
    pub recovery: RecoveryConfig,
    /// Batch enrichment admission control
    pub batch: BatchConfig,
    /// Persisted state retention
    pub state: StateConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Which repository backend stores sessions, progress and state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local maps, lost on restart
    #[default]
    Memory,
    /// One JSON document per session under `data_dir`
    File,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind
    pub backend: StorageBackend,
    /// Root directory for the file backend
    pub data_dir: PathBuf,
}

/// Backoff delays used by automated retry recovery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Delay before retrying after a provider rate limit (ms)
    pub rate_limit_delay_ms: u64,
    /// Delay before retrying an unavailable or timed out service (ms)
    pub service_unavailable_delay_ms: u64,
    /// Delay before retrying anything else (ms)
    pub default_delay_ms: u64,
    /// Executions attempted by one automated retry before giving up
    pub max_retry_attempts: u32,
}

/// Batch enrichment admission control
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum number of prospect jobs in flight per batch
    pub concurrency: usize,
    /// Delay between consecutive job starts (ms)
    pub inter_request_delay_ms: u64,
    /// Upper bound for a single enrichment stage (ms)
    pub stage_timeout_ms: u64,
}

/// Persisted state retention
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StateConfig {
    /// States whose session was not updated for this many days are removed by cleanup
    pub retention_days: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("prospectflow"),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            rate_limit_delay_ms: 60_000,
            service_unavailable_delay_ms: 30_000,
            default_delay_ms: 1_000,
            max_retry_attempts: 3,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            inter_request_delay_ms: 1_000,
            stage_timeout_ms: 30_000,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Configuration manager trait
pub trait ConfigManager {
    /// Load configuration
    fn load_config(&mut self) -> Result<OrchestratorConfig, crate::error::ConfigError>;
    /// Save configuration
    fn save_config(&self, config: &OrchestratorConfig) -> Result<(), crate::error::ConfigError>;
    /// Validate configuration
    fn validate_config(&self, config: &OrchestratorConfig)
        -> Result<(), crate::error::ConfigError>;
}
