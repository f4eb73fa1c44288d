//! Config command - show and validate configuration

use async_trait::async_trait;
use prospectflow_config::{ConfigManager, ConfigManagerTrait};
use serde_json::json;

use crate::commands::{Command, CommandContext};
use crate::error::CliResult;
use crate::output::{print_error, print_success, OutputStyle};

/// Config command handler
pub struct ConfigCommand;

impl ConfigCommand {
    /// Load the configuration and report whether it is usable
    pub fn validate(manager: &mut ConfigManager, json: bool) -> CliResult<()> {
        let path = manager.config_path().display().to_string();
        let result = manager.load_config();

        if json {
            let report = match &result {
                Ok(_) => json!({ "path": path, "valid": true }),
                Err(e) => json!({ "path": path, "valid": false, "error": e.to_string() }),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            match &result {
                Ok(_) => print_success(&format!("Configuration is valid ({})", path)),
                Err(e) => print_error(&format!("Invalid configuration ({}): {}", path, e)),
            }
        }

        result.map(|_| ()).map_err(Into::into)
    }
}

#[async_trait]
impl Command for ConfigCommand {
    async fn execute(&self, context: &CommandContext) -> CliResult<()> {
        if context.json {
            return context.print_json(&context.config);
        }

        let style: &OutputStyle = &context.style;
        let config = &context.config;
        println!("{}", style.header("Configuration"));
        println!("{}", style.key_value("file", &context.config_path.display().to_string()));
        println!("{}", style.key_value("storage.backend", &format!("{:?}", config.storage.backend)));
        println!("{}", style.key_value("storage.data_dir", &config.storage.data_dir.display().to_string()));
        println!("{}", style.key_value("batch.concurrency", &config.batch.concurrency.to_string()));
        println!(
            "{}",
            style.key_value("batch.inter_request_delay_ms", &config.batch.inter_request_delay_ms.to_string())
        );
        println!("{}", style.key_value("batch.stage_timeout_ms", &config.batch.stage_timeout_ms.to_string()));
        println!(
            "{}",
            style.key_value("recovery.rate_limit_delay_ms", &config.recovery.rate_limit_delay_ms.to_string())
        );
        println!(
            "{}",
            style.key_value(
                "recovery.service_unavailable_delay_ms",
                &config.recovery.service_unavailable_delay_ms.to_string()
            )
        );
        println!("{}", style.key_value("recovery.default_delay_ms", &config.recovery.default_delay_ms.to_string()));
        println!(
            "{}",
            style.key_value("recovery.max_retry_attempts", &config.recovery.max_retry_attempts.to_string())
        );
        println!("{}", style.key_value("state.retention_days", &config.state.retention_days.to_string()));
        println!("{}", style.key_value("logging.level", &config.logging.level));
        println!("{}", style.key_value("logging.json", &config.logging.json.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[batch]\nconcurrency = 0\n").unwrap();

        let mut manager = ConfigManager::with_path(path).with_env_overrides(HashMap::new());
        assert!(ConfigCommand::validate(&mut manager, true).is_err());
    }

    #[test]
    fn test_validate_accepts_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::with_path(temp_dir.path().join("absent.toml"))
            .with_env_overrides(HashMap::new());
        assert!(ConfigCommand::validate(&mut manager, true).is_ok());
    }
}
