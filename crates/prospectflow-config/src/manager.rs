//! Configuration manager implementation

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use tracing_subscriber::EnvFilter;

use crate::{
    error::{ConfigError, Result},
    types::{ConfigManager as ConfigManagerTrait, OrchestratorConfig},
};

/// Environment prefix for overrides, e.g. `PROSPECTFLOW_BATCH__CONCURRENCY=5`
pub const ENV_PREFIX: &str = "PROSPECTFLOW";

/// Configuration manager
///
/// Layers an optional TOML file under `PROSPECTFLOW_*` environment variables.
pub struct ConfigManager {
    /// Configuration file path
    config_path: PathBuf,
    /// Environment prefix
    env_prefix: String,
    /// Explicit environment map, used instead of the process environment
    env_overrides: Option<HashMap<String, String>>,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new() -> Self {
        Self::with_path(Self::default_config_path())
    }

    /// Create with custom config path
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            config_path: path,
            env_prefix: ENV_PREFIX.to_string(),
            env_overrides: None,
        }
    }

    /// Replace the process environment with an explicit map (for testing)
    pub fn with_env_overrides(mut self, vars: HashMap<String, String>) -> Self {
        self.env_overrides = Some(vars);
        self
    }

    /// Path of the TOML file this manager reads and writes
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get default config path
    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("prospectflow")
            .join("config.toml")
    }
}

impl ConfigManagerTrait for ConfigManager {
    fn load_config(&mut self) -> Result<OrchestratorConfig> {
        let environment = Environment::with_prefix(&self.env_prefix)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(self.env_overrides.clone());

        let builder = Config::builder()
            .add_source(
                File::from(self.config_path.clone())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(environment);

        let config = builder.build()?;
        let orchestrator_config: OrchestratorConfig = config.try_deserialize()?;
        self.validate_config(&orchestrator_config)?;
        Ok(orchestrator_config)
    }

    fn save_config(&self, config: &OrchestratorConfig) -> Result<()> {
        let toml = toml::to_string(config)?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config_path, toml)?;
        Ok(())
    }

    fn validate_config(&self, config: &OrchestratorConfig) -> Result<()> {
        if config.batch.concurrency == 0 {
            return Err(ConfigError::Validation(
                "Batch concurrency must be greater than 0".to_string(),
            ));
        }
        if config.batch.stage_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "Stage timeout must be greater than 0".to_string(),
            ));
        }
        if config.state.retention_days == 0 {
            return Err(ConfigError::Validation(
                "State retention must be at least one day".to_string(),
            ));
        }
        if config.logging.level.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Logging level cannot be empty".to_string(),
            ));
        }
        if let Err(e) = EnvFilter::try_new(&config.logging.level) {
            return Err(ConfigError::Validation(format!(
                "Invalid logging level '{}': {}",
                config.logging.level, e
            )));
        }
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
