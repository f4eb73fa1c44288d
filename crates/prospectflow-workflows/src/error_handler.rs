//! Error classification, the per-session error ledger and recovery

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prospectflow_config::RecoveryConfig;
use prospectflow_persistence::Repository;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::WorkflowResult;
use crate::error_catalog::{
    ErrorCatalog, ErrorCategory, ErrorDefinition, ErrorSeverity, RecoveryAction,
    RecoveryActionType, API_RATE_LIMIT_EXCEEDED, ENRICHMENT_SERVICE_UNAVAILABLE,
};
use crate::locks::SessionLocks;
use crate::models::ErrorContext;

/// Append-only error log per session.
///
/// Shared by the error handler and the state manager; callers hold the
/// session's lock around every mutation.
#[derive(Clone)]
pub struct ErrorLedger {
    repository: Arc<dyn Repository<Vec<ErrorContext>>>,
}

impl ErrorLedger {
    /// Create a ledger over a repository
    pub fn new(repository: Arc<dyn Repository<Vec<ErrorContext>>>) -> Self {
        Self { repository }
    }

    /// Append one error
    pub async fn append(&self, context: &ErrorContext) -> WorkflowResult<usize> {
        let mut entries = self.history(&context.session_id).await?;
        entries.push(context.clone());
        self.repository.save(&context.session_id, &entries).await?;
        Ok(entries.len())
    }

    /// Errors of a session, oldest first
    pub async fn history(&self, session_id: &str) -> WorkflowResult<Vec<ErrorContext>> {
        Ok(self.repository.find(session_id).await?.unwrap_or_default())
    }

    /// Replace a session's errors wholesale
    pub async fn replace(&self, session_id: &str, entries: Vec<ErrorContext>) -> WorkflowResult<()> {
        if entries.is_empty() {
            self.repository.delete(session_id).await?;
        } else {
            self.repository.save(session_id, &entries).await?;
        }
        Ok(())
    }

    /// Drop a session's errors
    pub async fn clear(&self, session_id: &str) -> WorkflowResult<()> {
        self.repository.delete(session_id).await?;
        Ok(())
    }

    /// Every recorded error across sessions
    pub async fn all(&self) -> WorkflowResult<Vec<ErrorContext>> {
        Ok(self.repository.list().await?.into_iter().flatten().collect())
    }
}

/// Operation re-executed by an automated retry
#[async_trait]
pub trait RecoveryOperation: Send + Sync {
    /// Run the operation once
    async fn execute(&self) -> Result<(), String>;
}

#[async_trait]
impl<F, Fut> RecoveryOperation for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    async fn execute(&self) -> Result<(), String> {
        (self)().await
    }
}

/// Outcome of [`ErrorHandler::handle_error`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandlingResult {
    /// Resolved catalog definition
    pub error_definition: ErrorDefinition,
    /// First declared recovery action
    pub suggested_action: Option<RecoveryAction>,
    /// Whether the error is recoverable at all
    pub can_recover: bool,
}

/// Outcome of [`ErrorHandler::attempt_recovery`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryResult {
    /// Whether the recovery succeeded
    pub success: bool,
    /// Action that was attempted
    pub action: RecoveryActionType,
    /// Operation executions performed
    pub attempts: u32,
    /// Outcome description
    pub message: String,
}

/// Occurrences of one code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrequency {
    /// Error code
    pub code: String,
    /// Occurrences
    pub count: usize,
}

/// Aggregate error statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorStatistics {
    /// Errors considered
    pub total: usize,
    /// Count per category
    pub by_category: BTreeMap<ErrorCategory, usize>,
    /// Count per severity
    pub by_severity: BTreeMap<ErrorSeverity, usize>,
    /// Five most frequent codes, ties broken by code
    pub top_errors: Vec<ErrorFrequency>,
}

/// Classifies errors, records them and runs automated recovery
pub struct ErrorHandler {
    catalog: ErrorCatalog,
    ledger: ErrorLedger,
    locks: SessionLocks,
    recovery: RecoveryConfig,
}

impl ErrorHandler {
    /// Create a handler with the built-in catalog
    pub fn new(ledger: ErrorLedger, locks: SessionLocks, recovery: RecoveryConfig) -> Self {
        Self {
            catalog: ErrorCatalog::new(),
            ledger,
            locks,
            recovery,
        }
    }

    /// The ledger this handler appends to
    pub fn ledger(&self) -> &ErrorLedger {
        &self.ledger
    }

    /// The definition catalog
    pub fn catalog(&self) -> &ErrorCatalog {
        &self.catalog
    }

    /// Add or replace a catalog definition
    pub fn register_error_definition(&self, definition: ErrorDefinition) {
        debug!(code = %definition.code, "Registered error definition");
        self.catalog.register(definition);
    }

    /// Catalog code for an error context
    pub fn identify_error_code(&self, context: &ErrorContext) -> String {
        self.catalog.identify(&context.error)
    }

    /// Classify an error, record it in the ledger and pick the first declared action
    pub async fn handle_error(&self, context: &ErrorContext) -> WorkflowResult<ErrorHandlingResult> {
        let code = self.identify_error_code(context);
        let definition = self.catalog.resolve(&code);

        {
            let _guard = self.locks.lock(&context.session_id).await;
            self.ledger.append(context).await?;
        }

        error!(
            session_id = %context.session_id,
            step = ?context.step,
            code = %definition.code,
            stack = ?context.error.stack,
            "{}: {}",
            definition.technical_message,
            context.error.message
        );

        Ok(ErrorHandlingResult {
            suggested_action: definition.recovery_actions.first().cloned(),
            can_recover: definition.recoverable,
            error_definition: definition,
        })
    }

    /// Run an automated recovery action.
    ///
    /// `retry` waits the code's delay before each execution and stops at the
    /// first success, up to the configured attempt count. `skip` succeeds
    /// without running anything.
    pub async fn attempt_recovery(
        &self,
        context: &ErrorContext,
        action: &RecoveryAction,
        operation: &dyn RecoveryOperation,
    ) -> RecoveryResult {
        if !action.automated {
            return RecoveryResult {
                success: false,
                action: action.action_type,
                attempts: 0,
                message: format!("{} requires manual intervention", action.description),
            };
        }

        match action.action_type {
            RecoveryActionType::Retry => {
                let code = self.identify_error_code(context);
                let delay = self.retry_delay(&code);
                let max_attempts = self.recovery.max_retry_attempts.max(1);
                let mut last_error = String::new();

                for attempt in 1..=max_attempts {
                    debug!(
                        session_id = %context.session_id,
                        code = %code,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Waiting before retry"
                    );
                    tokio::time::sleep(delay).await;

                    match operation.execute().await {
                        Ok(()) => {
                            info!(session_id = %context.session_id, attempt, "Retry succeeded");
                            return RecoveryResult {
                                success: true,
                                action: RecoveryActionType::Retry,
                                attempts: attempt,
                                message: format!("Recovered after {} attempt(s)", attempt),
                            };
                        }
                        Err(e) => {
                            warn!(session_id = %context.session_id, attempt, "Retry failed: {}", e);
                            last_error = e;
                        }
                    }
                }

                RecoveryResult {
                    success: false,
                    action: RecoveryActionType::Retry,
                    attempts: max_attempts,
                    message: format!(
                        "Retry failed after {} attempt(s): {}",
                        max_attempts, last_error
                    ),
                }
            }
            RecoveryActionType::Skip => RecoveryResult {
                success: true,
                action: RecoveryActionType::Skip,
                attempts: 0,
                message: "Operation skipped".to_string(),
            },
            other => RecoveryResult {
                success: false,
                action: other,
                attempts: 0,
                message: format!("Automated {:?} recovery is not supported", other),
            },
        }
    }

    /// Delay before retrying an error code
    pub fn retry_delay(&self, code: &str) -> Duration {
        let millis = match code {
            API_RATE_LIMIT_EXCEEDED => self.recovery.rate_limit_delay_ms,
            ENRICHMENT_SERVICE_UNAVAILABLE => self.recovery.service_unavailable_delay_ms,
            _ => self.recovery.default_delay_ms,
        };
        Duration::from_millis(millis)
    }

    /// Whether the error's definition is recoverable
    pub fn is_recoverable(&self, context: &ErrorContext) -> bool {
        self.catalog
            .resolve(&self.identify_error_code(context))
            .recoverable
    }

    /// End-user message for an error
    pub fn get_user_message(&self, context: &ErrorContext) -> String {
        self.catalog
            .resolve(&self.identify_error_code(context))
            .user_message
    }

    /// Statistics over one session's ledger or every ledger
    pub async fn get_error_statistics(
        &self,
        session_id: Option<&str>,
    ) -> WorkflowResult<ErrorStatistics> {
        let entries = match session_id {
            Some(session_id) => self.ledger.history(session_id).await?,
            None => self.ledger.all().await?,
        };

        let mut by_category = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        let mut by_code: BTreeMap<String, usize> = BTreeMap::new();
        for context in &entries {
            let definition = self.catalog.resolve(&self.identify_error_code(context));
            *by_category.entry(definition.category).or_insert(0) += 1;
            *by_severity.entry(definition.severity).or_insert(0) += 1;
            *by_code.entry(definition.code).or_insert(0) += 1;
        }

        let mut top_errors: Vec<ErrorFrequency> = by_code
            .into_iter()
            .map(|(code, count)| ErrorFrequency { code, count })
            .collect();
        top_errors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.code.cmp(&b.code)));
        top_errors.truncate(5);

        Ok(ErrorStatistics {
            total: entries.len(),
            by_category,
            by_severity,
            top_errors,
        })
    }

    /// Errors recorded for a session, oldest first
    pub async fn get_error_history(&self, session_id: &str) -> WorkflowResult<Vec<ErrorContext>> {
        self.ledger.history(session_id).await
    }

    /// Drop a session's errors
    pub async fn clear_error_history(&self, session_id: &str) -> WorkflowResult<()> {
        let _guard = self.locks.lock(session_id).await;
        self.ledger.clear(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_catalog::{INSUFFICIENT_API_CREDITS, SYSTEM_ERROR};
    use prospectflow_persistence::InMemoryRepository;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_recovery() -> RecoveryConfig {
        RecoveryConfig {
            rate_limit_delay_ms: 5,
            service_unavailable_delay_ms: 3,
            default_delay_ms: 1,
            max_retry_attempts: 3,
        }
    }

    fn handler(recovery: RecoveryConfig) -> ErrorHandler {
        ErrorHandler::new(
            ErrorLedger::new(Arc::new(InMemoryRepository::new())),
            SessionLocks::new(),
            recovery,
        )
    }

    #[test]
    fn test_default_retry_delays() {
        let handler = handler(RecoveryConfig::default());
        assert_eq!(
            handler.retry_delay(API_RATE_LIMIT_EXCEEDED),
            Duration::from_millis(60_000)
        );
        assert_eq!(
            handler.retry_delay(ENRICHMENT_SERVICE_UNAVAILABLE),
            Duration::from_millis(30_000)
        );
        assert_eq!(handler.retry_delay(SYSTEM_ERROR), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_handle_error_records_and_suggests() {
        let handler = handler(fast_recovery());
        let context = ErrorContext::new("s1", "HTTP 429 Too Many Requests");

        let result = handler.handle_error(&context).await.unwrap();
        assert_eq!(result.error_definition.code, API_RATE_LIMIT_EXCEEDED);
        assert!(result.can_recover);
        assert_eq!(
            result.suggested_action.map(|a| a.action_type),
            Some(RecoveryActionType::Retry)
        );
        assert_eq!(handler.get_error_history("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_user_errors_are_not_recoverable() {
        let handler = handler(fast_recovery());
        let context = ErrorContext::new("s1", "out of credits");

        assert_eq!(handler.identify_error_code(&context), INSUFFICIENT_API_CREDITS);
        assert!(!handler.is_recoverable(&context));
        assert!(handler.get_user_message(&context).contains("credits"));
    }

    #[tokio::test]
    async fn test_retry_reexecutes_until_success() {
        let handler = handler(fast_recovery());
        let context = ErrorContext::new("s1", "connection refused");
        let action = handler.catalog().resolve(ENRICHMENT_SERVICE_UNAVAILABLE).recovery_actions[0].clone();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let operation = move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("still down".to_string())
                } else {
                    Ok(())
                }
            }
        };

        let result = handler.attempt_recovery(&context, &action, &operation).await;
        assert!(result.success);
        assert_eq!(result.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_reports_real_failure() {
        let handler = handler(fast_recovery());
        let context = ErrorContext::new("s1", "boom");
        let action = handler.catalog().resolve(SYSTEM_ERROR).recovery_actions[0].clone();
        let operation = || async { Err::<(), String>("still broken".to_string()) };

        let result = handler.attempt_recovery(&context, &action, &operation).await;
        assert!(!result.success);
        assert_eq!(result.attempts, 3);
        assert!(result.message.contains("still broken"));
    }

    #[tokio::test]
    async fn test_manual_action_is_not_automated() {
        let handler = handler(fast_recovery());
        let context = ErrorContext::new("s1", "out of credits");
        let action = handler.catalog().resolve(INSUFFICIENT_API_CREDITS).recovery_actions[0].clone();
        let operation = || async { Ok::<(), String>(()) };

        let result = handler.attempt_recovery(&context, &action, &operation).await;
        assert!(!result.success);
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn test_error_statistics_top_errors() {
        let handler = handler(fast_recovery());
        for message in ["429", "429", "timeout", "csv format", "boom"] {
            handler
                .handle_error(&ErrorContext::new("s1", message))
                .await
                .unwrap();
        }
        handler
            .handle_error(&ErrorContext::new("s2", "timeout"))
            .await
            .unwrap();

        let stats = handler.get_error_statistics(Some("s1")).await.unwrap();
        assert_eq!(stats.total, 5);
        assert_eq!(stats.top_errors[0].code, API_RATE_LIMIT_EXCEEDED);
        assert_eq!(stats.by_category.get(&ErrorCategory::External), Some(&3));

        let all = handler.get_error_statistics(None).await.unwrap();
        assert_eq!(all.total, 6);
        assert_eq!(all.top_errors[0].count, 2);
        // Ties resolve alphabetically
        assert_eq!(all.top_errors[0].code, API_RATE_LIMIT_EXCEEDED);
        assert_eq!(all.top_errors[1].code, ENRICHMENT_SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_clear_error_history() {
        let handler = handler(fast_recovery());
        handler
            .handle_error(&ErrorContext::new("s1", "boom"))
            .await
            .unwrap();
        handler.clear_error_history("s1").await.unwrap();
        assert!(handler.get_error_history("s1").await.unwrap().is_empty());
    }
}
