//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::error::{ConfigError, Result};
use crate::types::LoggingConfig;

/// Build the filter for a logging configuration.
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level)
        .map_err(|e| ConfigError::Logging(format!("invalid level '{}': {}", config.level, e)))
}

/// Install the global tracing subscriber.
///
/// Fails with [`ConfigError::SubscriberInstalled`] if a subscriber is already
/// installed, and with [`ConfigError::Logging`] for an unusable level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ConfigError::SubscriberInstalled(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_accepts_directives() {
        let config = LoggingConfig {
            level: "prospectflow_workflows=debug,info".to_string(),
            json: false,
        };
        assert!(build_filter(&config).is_ok());
    }

    #[test]
    fn test_second_install_reports_installed_subscriber() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(ConfigError::SubscriberInstalled(_))
        ));
    }
}
