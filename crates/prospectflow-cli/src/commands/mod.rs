//! Command handlers for the prospectflow CLI

pub mod config;
pub mod sessions;
pub mod simulate;
pub mod state;

pub use config::ConfigCommand;
pub use sessions::{SessionsAction, SessionsCommand};
pub use simulate::{SimulateCommand, SimulateOptions, SimulatedProvider};
pub use state::{StateAction, StateCommand};

use std::path::PathBuf;

use prospectflow_config::OrchestratorConfig;
use prospectflow_workflows::WorkflowOrchestrator;
use serde::Serialize;

use crate::error::CliResult;
use crate::output::OutputStyle;

/// Shared inputs of every command
pub struct CommandContext {
    /// Effective configuration
    pub config: OrchestratorConfig,
    /// File the configuration was read from
    pub config_path: PathBuf,
    /// Print JSON instead of text
    pub json: bool,
    /// Text styling
    pub style: OutputStyle,
}

impl CommandContext {
    /// Context with the default terminal styling
    pub fn new(config: OrchestratorConfig, config_path: PathBuf, json: bool) -> Self {
        Self {
            config,
            config_path,
            json,
            style: OutputStyle::default(),
        }
    }

    /// Orchestrator over the configured storage backend
    pub fn orchestrator(&self) -> CliResult<WorkflowOrchestrator> {
        Ok(WorkflowOrchestrator::from_config(self.config.clone())?)
    }

    /// Print a value as pretty JSON
    pub fn print_json<T: Serialize>(&self, value: &T) -> CliResult<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Trait for command handlers
#[async_trait::async_trait]
pub trait Command: Send + Sync {
    /// Execute the command
    async fn execute(&self, context: &CommandContext) -> CliResult<()>;
}
