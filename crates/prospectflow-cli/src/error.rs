//! CLI error types

use prospectflow_config::ConfigError;
use prospectflow_workflows::WorkflowError;
use thiserror::Error;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CliError {
    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            CliError::InvalidArgument { message } => {
                format!("{}\n\nRun 'prospectflow --help' for usage.", message)
            }
            CliError::Config(e) => format!(
                "{}\n\nCheck the config file or run 'prospectflow config validate'.",
                e
            ),
            CliError::Workflow(WorkflowError::NotFound(what)) => {
                format!("Not found: {}\n\nRun 'prospectflow sessions list' to see stored sessions.", what)
            }
            other => other.to_string(),
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
