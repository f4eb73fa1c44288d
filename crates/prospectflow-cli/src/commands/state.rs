//! State command - inspect and maintain persisted workflow state

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::commands::{Command, CommandContext};
use crate::error::CliResult;
use crate::output::print_success;

/// State command action
#[derive(Debug, Clone)]
pub enum StateAction {
    /// Compact summary
    Summary { session_id: String },
    /// Checkpoint log
    History { session_id: String },
    /// Export to stdout or a file
    Export {
        session_id: String,
        output: Option<PathBuf>,
    },
    /// Import from a file
    Import { session_id: String, file: PathBuf },
    /// Delete stale states
    Cleanup { days: Option<u32> },
}

/// State command handler
pub struct StateCommand {
    action: StateAction,
}

impl StateCommand {
    /// Create a new state command
    pub fn new(action: StateAction) -> Self {
        Self { action }
    }
}

#[async_trait]
impl Command for StateCommand {
    async fn execute(&self, context: &CommandContext) -> CliResult<()> {
        let orchestrator = context.orchestrator()?;
        let states = orchestrator.states();
        let style = &context.style;

        match &self.action {
            StateAction::Summary { session_id } => {
                let summary = states.get_state_summary(session_id).await?;
                if context.json {
                    return context.print_json(&summary);
                }
                println!("{}", style.header(&format!("State {}", session_id)));
                println!("{}", style.key_value("step", summary.current_step.as_str()));
                println!("{}", style.key_value("progress", &style.progress_bar(summary.overall_progress)));
                println!("{}", style.key_value("checkpoints", &summary.checkpoint_count.to_string()));
                println!("{}", style.key_value("errors", &summary.error_count.to_string()));
                println!(
                    "{}",
                    style.key_value("configuration complete", &summary.configuration_complete.to_string())
                );
                println!("{}", style.key_value("last modified", &summary.last_modified.to_rfc3339()));
                Ok(())
            }
            StateAction::History { session_id } => {
                let history = states.get_workflow_history(session_id).await?;
                if context.json {
                    return context.print_json(&history);
                }
                println!("{}", style.header(&format!("Checkpoints of {}", session_id)));
                for (index, entry) in history.iter().enumerate() {
                    println!(
                        "  {:>3}  {}  {:<18} {:>3}%  {}",
                        index,
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        entry.step,
                        entry.progress,
                        entry.description
                    );
                }
                Ok(())
            }
            StateAction::Export { session_id, output } => {
                let exported = states.export_state(session_id).await?;
                match output {
                    Some(path) => {
                        std::fs::write(path, exported)?;
                        info!(session_id = %session_id, path = %path.display(), "Exported state");
                        print_success(&format!("Exported {} to {}", session_id, path.display()));
                    }
                    None => println!("{}", exported),
                }
                Ok(())
            }
            StateAction::Import { session_id, file } => {
                let serialized = std::fs::read_to_string(file)?;
                let state = states.import_state(session_id, &serialized).await?;
                if context.json {
                    return context.print_json(&state);
                }
                print_success(&format!(
                    "Imported {} at {} ({}%)",
                    session_id, state.session.current_step, state.progress.overall_progress
                ));
                Ok(())
            }
            StateAction::Cleanup { days } => {
                let days = days.unwrap_or(context.config.state.retention_days);
                let report = states.cleanup_old_states(days).await?;
                if context.json {
                    return context.print_json(&report);
                }
                print_success(&format!(
                    "Removed {} states older than {} days, {} remain",
                    report.deleted_count, days, report.remaining_count
                ));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospectflow_config::{OrchestratorConfig, StorageBackend, StorageConfig};
    use prospectflow_workflows::WorkflowStep;
    use tempfile::TempDir;

    fn file_context(temp_dir: &TempDir) -> CommandContext {
        let config = OrchestratorConfig {
            storage: StorageConfig {
                backend: StorageBackend::File,
                data_dir: temp_dir.path().join("data"),
            },
            ..Default::default()
        };
        CommandContext::new(config, temp_dir.path().join("config.toml"), true)
    }

    #[tokio::test]
    async fn test_export_then_import_under_new_id() {
        let temp_dir = TempDir::new().unwrap();
        let context = file_context(&temp_dir);

        let session_id = {
            let orchestrator = context.orchestrator().unwrap();
            let session = orchestrator.start_workflow("user-1", None, None).await.unwrap();
            orchestrator
                .finish_step(&session.id, WorkflowStep::UploadCsv, None)
                .await
                .unwrap();
            session.id
        };

        let export_path = temp_dir.path().join("export.json");
        StateCommand::new(StateAction::Export {
            session_id: session_id.clone(),
            output: Some(export_path.clone()),
        })
        .execute(&context)
        .await
        .unwrap();

        StateCommand::new(StateAction::Import {
            session_id: "restored".to_string(),
            file: export_path,
        })
        .execute(&context)
        .await
        .unwrap();

        let orchestrator = context.orchestrator().unwrap();
        let summary = orchestrator.states().get_state_summary("restored").await.unwrap();
        assert_eq!(summary.current_step, WorkflowStep::CampaignSettings);
        assert_eq!(summary.overall_progress, 20);
    }

    #[tokio::test]
    async fn test_summary_of_missing_state_fails() {
        let temp_dir = TempDir::new().unwrap();
        let context = file_context(&temp_dir);

        let result = StateCommand::new(StateAction::Summary {
            session_id: "missing".to_string(),
        })
        .execute(&context)
        .await;
        assert!(result.is_err());
    }
}
