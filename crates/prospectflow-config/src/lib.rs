//! ProspectFlow Configuration Management
//!
//! Loads the orchestrator configuration from a TOML file and
//! `PROSPECTFLOW_*` environment variables, validates it, and installs the
//! tracing subscriber.

pub mod error;
pub mod logging;
pub mod manager;
pub mod types;

pub use error::{ConfigError, Result};
pub use logging::init_logging;
pub use manager::ConfigManager;
pub use types::{
    BatchConfig, ConfigManager as ConfigManagerTrait, LoggingConfig, OrchestratorConfig,
    RecoveryConfig, StateConfig, StorageBackend, StorageConfig,
};
