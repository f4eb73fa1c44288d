use prospectflow_config::*;
use std::collections::HashMap;
use tempfile::TempDir;

#[test]
fn test_orchestrator_config_default() {
    let config = OrchestratorConfig::default();
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.recovery.rate_limit_delay_ms, 60_000);
    assert_eq!(config.recovery.service_unavailable_delay_ms, 30_000);
    assert_eq!(config.recovery.default_delay_ms, 1_000);
    assert_eq!(config.batch.concurrency, 3);
    assert_eq!(config.state.retention_days, 30);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_config_validation() {
    let manager = ConfigManager::with_path("unused.toml".into());
    let mut config = OrchestratorConfig::default();
    assert!(manager.validate_config(&config).is_ok());

    config.batch.concurrency = 0;
    assert!(manager.validate_config(&config).is_err());

    config = OrchestratorConfig::default();
    config.state.retention_days = 0;
    assert!(manager.validate_config(&config).is_err());

    config = OrchestratorConfig::default();
    config.logging.level = "prospectflow=loud".to_string();
    assert!(matches!(
        manager.validate_config(&config),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = ConfigManager::with_path(temp_dir.path().join("absent.toml"))
        .with_env_overrides(HashMap::new());

    let config = manager.load_config().unwrap();
    assert_eq!(config.batch, BatchConfig::default());
}

#[test]
fn test_load_partial_toml_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[storage]
backend = "file"
data_dir = "/var/lib/prospectflow"

[batch]
concurrency = 8
"#,
    )
    .unwrap();

    let mut manager = ConfigManager::with_path(path).with_env_overrides(HashMap::new());
    let config = manager.load_config().unwrap();

    assert_eq!(config.storage.backend, StorageBackend::File);
    assert_eq!(config.batch.concurrency, 8);
    assert_eq!(config.batch.stage_timeout_ms, 30_000);
    assert_eq!(config.recovery, RecoveryConfig::default());
}

#[test]
fn test_environment_overrides_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "[batch]\nconcurrency = 8\n").unwrap();

    let mut env = HashMap::new();
    env.insert("PROSPECTFLOW_BATCH__CONCURRENCY".to_string(), "2".to_string());
    env.insert(
        "PROSPECTFLOW_RECOVERY__DEFAULT_DELAY_MS".to_string(),
        "250".to_string(),
    );

    let mut manager = ConfigManager::with_path(path).with_env_overrides(env);
    let config = manager.load_config().unwrap();

    assert_eq!(config.batch.concurrency, 2);
    assert_eq!(config.recovery.default_delay_ms, 250);
}

#[test]
fn test_save_and_reload() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.toml");

    let mut config = OrchestratorConfig::default();
    config.state.retention_days = 7;
    config.logging.json = true;

    let manager = ConfigManager::with_path(path.clone());
    manager.save_config(&config).unwrap();
    assert!(path.exists());

    let mut reloaded = ConfigManager::with_path(path).with_env_overrides(HashMap::new());
    assert_eq!(reloaded.load_config().unwrap(), config);
}

#[test]
fn test_invalid_file_values_are_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "[batch]\nconcurrency = 0\n").unwrap();

    let mut manager = ConfigManager::with_path(path).with_env_overrides(HashMap::new());
    assert!(matches!(
        manager.load_config(),
        Err(ConfigError::Validation(_))
    ));
}
