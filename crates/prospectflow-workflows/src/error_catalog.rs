//! Static catalog of known errors and their recovery policies

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::models::ErrorDetails;

/// Upload exceeds the size limit
pub const FILE_TOO_LARGE: &str = "FILE_TOO_LARGE";
/// CSV could not be parsed
pub const INVALID_CSV_FORMAT: &str = "INVALID_CSV_FORMAT";
/// CSV lacks mandatory columns
pub const MISSING_REQUIRED_HEADERS: &str = "MISSING_REQUIRED_HEADERS";
/// An enrichment provider is down or timing out
pub const ENRICHMENT_SERVICE_UNAVAILABLE: &str = "ENRICHMENT_SERVICE_UNAVAILABLE";
/// A provider rejected the request with a rate limit
pub const API_RATE_LIMIT_EXCEEDED: &str = "API_RATE_LIMIT_EXCEEDED";
/// The account ran out of provider credits
pub const INSUFFICIENT_API_CREDITS: &str = "INSUFFICIENT_API_CREDITS";
/// The AI provider failed to produce an email
pub const EMAIL_GENERATION_FAILED: &str = "EMAIL_GENERATION_FAILED";
/// Unexpected internal failure
pub const SYSTEM_ERROR: &str = "SYSTEM_ERROR";
/// Fallback for codes missing from the catalog
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

/// Broad error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Bad input
    Validation,
    /// Dependent-service failure
    External,
    /// Needs user action
    User,
    /// Unexpected or unclassified
    System,
}

/// Error severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Cosmetic
    Low,
    /// Degrades one step
    Medium,
    /// Blocks one step
    High,
    /// Blocks the whole run
    Critical,
}

/// Kind of recovery action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryActionType {
    /// Re-execute the failed operation after a delay
    Retry,
    /// Continue without the failed operation
    Skip,
    /// Requires a human
    Manual,
    /// Stop the run
    Abort,
    /// Start the step over
    Restart,
}

/// A declared remedy for an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAction {
    /// Action kind
    #[serde(rename = "type")]
    pub action_type: RecoveryActionType,
    /// Human-readable description
    pub description: String,
    /// Whether the handler may run it without a human
    pub automated: bool,
    /// Preconditions, informational
    #[serde(default)]
    pub conditions: Vec<String>,
}

impl RecoveryAction {
    fn new(action_type: RecoveryActionType, description: &str, automated: bool) -> Self {
        Self {
            action_type,
            description: description.to_string(),
            automated,
            conditions: Vec::new(),
        }
    }

    fn when(mut self, condition: &str) -> Self {
        self.conditions.push(condition.to_string());
        self
    }
}

/// Catalog entry describing one error code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDefinition {
    /// Stable code, e.g. `API_RATE_LIMIT_EXCEEDED`
    pub code: String,
    /// Short name
    pub name: String,
    /// What the error means
    pub description: String,
    /// Taxonomy bucket
    pub category: ErrorCategory,
    /// Severity
    pub severity: ErrorSeverity,
    /// Whether any recovery is possible
    pub recoverable: bool,
    /// Candidate actions, most preferred first
    pub recovery_actions: Vec<RecoveryAction>,
    /// Message shown to end users
    pub user_message: String,
    /// Message written to logs only
    pub technical_message: String,
}

#[allow(clippy::too_many_arguments)]
fn definition(
    code: &str,
    name: &str,
    description: &str,
    category: ErrorCategory,
    severity: ErrorSeverity,
    recoverable: bool,
    recovery_actions: Vec<RecoveryAction>,
    user_message: &str,
    technical_message: &str,
) -> ErrorDefinition {
    ErrorDefinition {
        code: code.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category,
        severity,
        recoverable,
        recovery_actions,
        user_message: user_message.to_string(),
        technical_message: technical_message.to_string(),
    }
}

/// Built-in catalog entries
pub fn builtin_definitions() -> Vec<ErrorDefinition> {
    use ErrorCategory::*;
    use ErrorSeverity::*;
    use RecoveryActionType::*;

    vec![
        definition(
            FILE_TOO_LARGE,
            "File Too Large",
            "The uploaded file exceeds the maximum allowed size",
            Validation,
            Medium,
            true,
            vec![RecoveryAction::new(Manual, "Split the file or remove unused columns", false)],
            "The file is too large. Please upload a smaller CSV file.",
            "Upload rejected: file size exceeds limit",
        ),
        definition(
            INVALID_CSV_FORMAT,
            "Invalid CSV Format",
            "The uploaded file could not be parsed as CSV",
            Validation,
            Medium,
            true,
            vec![RecoveryAction::new(Manual, "Fix the file format and upload it again", false)],
            "The file is not a valid CSV. Please check the format and try again.",
            "CSV parser rejected the uploaded file",
        ),
        definition(
            MISSING_REQUIRED_HEADERS,
            "Missing Required Headers",
            "The CSV is missing one or more mandatory columns",
            Validation,
            High,
            true,
            vec![RecoveryAction::new(Manual, "Add the missing columns and upload again", false)],
            "Your CSV is missing required columns. Please include name, company and LinkedIn URL.",
            "CSV header validation failed",
        ),
        definition(
            ENRICHMENT_SERVICE_UNAVAILABLE,
            "Enrichment Service Unavailable",
            "An enrichment provider did not respond",
            External,
            High,
            true,
            vec![
                RecoveryAction::new(Retry, "Retry once the service is back", true)
                    .when("service_reachable"),
                RecoveryAction::new(Skip, "Continue without this enrichment source", true),
            ],
            "An enrichment service is temporarily unavailable. We'll retry automatically.",
            "Enrichment provider unavailable or timed out",
        ),
        definition(
            API_RATE_LIMIT_EXCEEDED,
            "API Rate Limit Exceeded",
            "A provider rejected the request because of its rate limit",
            External,
            Medium,
            true,
            vec![
                RecoveryAction::new(Retry, "Retry after the rate limit window resets", true)
                    .when("rate_limit_window_elapsed"),
                RecoveryAction::new(Skip, "Continue without this request", true),
            ],
            "We're sending requests too quickly. Processing will resume shortly.",
            "Provider returned 429 Too Many Requests",
        ),
        definition(
            INSUFFICIENT_API_CREDITS,
            "Insufficient API Credits",
            "The provider account has no credits left",
            User,
            Critical,
            false,
            vec![
                RecoveryAction::new(Manual, "Top up provider credits", false),
                RecoveryAction::new(Abort, "Stop enrichment for this campaign", false),
            ],
            "Your API credits are exhausted. Please add credits to continue.",
            "Provider rejected request: quota or credits exhausted",
        ),
        definition(
            EMAIL_GENERATION_FAILED,
            "Email Generation Failed",
            "The AI provider could not generate an email",
            External,
            Medium,
            true,
            vec![
                RecoveryAction::new(Retry, "Regenerate the email", true),
                RecoveryAction::new(Skip, "Leave this prospect without an email", true),
            ],
            "We couldn't generate this email. Please try again.",
            "AI provider failed to produce email content",
        ),
        definition(
            SYSTEM_ERROR,
            "System Error",
            "An unexpected internal error occurred",
            System,
            High,
            true,
            vec![
                RecoveryAction::new(Retry, "Retry the operation", true),
                RecoveryAction::new(Restart, "Restart the step", false),
            ],
            "Something went wrong on our side. Please try again.",
            "Unexpected internal error",
        ),
    ]
}

/// Fallback definition for codes missing from the catalog
pub fn unknown_definition() -> ErrorDefinition {
    definition(
        UNKNOWN_ERROR,
        "Unknown Error",
        "The error code is not registered",
        ErrorCategory::System,
        ErrorSeverity::Medium,
        false,
        vec![RecoveryAction::new(
            RecoveryActionType::Manual,
            "Contact support",
            false,
        )],
        "An unexpected error occurred. Please contact support if it persists.",
        "Unregistered error code",
    )
}

/// Classify a raw message by keyword.
///
/// Rules are checked in order over the lowercased message; the first match
/// wins and anything unmatched is a `SYSTEM_ERROR`.
pub fn classify_message(message: &str) -> &'static str {
    let message = message.to_lowercase();
    let has = |needle: &str| message.contains(needle);

    if has("file too large") || has("file is too large") {
        FILE_TOO_LARGE
    } else if has("csv") && has("format") {
        INVALID_CSV_FORMAT
    } else if (has("missing") || has("required")) && has("header") {
        MISSING_REQUIRED_HEADERS
    } else if has("rate limit") || has("429") || has("too many requests") {
        API_RATE_LIMIT_EXCEEDED
    } else if has("credits") || has("quota") {
        INSUFFICIENT_API_CREDITS
    } else if has("email generation") {
        EMAIL_GENERATION_FAILED
    } else if has("service unavailable")
        || has("timeout")
        || has("timed out")
        || has("connection refused")
    {
        ENRICHMENT_SERVICE_UNAVAILABLE
    } else {
        SYSTEM_ERROR
    }
}

/// Registry of error definitions keyed by code
#[derive(Debug)]
pub struct ErrorCatalog {
    definitions: RwLock<HashMap<String, ErrorDefinition>>,
}

impl ErrorCatalog {
    /// Catalog seeded with the built-in definitions
    pub fn new() -> Self {
        let definitions = builtin_definitions()
            .into_iter()
            .map(|def| (def.code.clone(), def))
            .collect();
        Self {
            definitions: RwLock::new(definitions),
        }
    }

    /// Add or replace a definition
    pub fn register(&self, definition: ErrorDefinition) {
        self.definitions
            .write()
            .insert(definition.code.clone(), definition);
    }

    /// Definition for a code, if registered
    pub fn get(&self, code: &str) -> Option<ErrorDefinition> {
        self.definitions.read().get(code).cloned()
    }

    /// Definition for a code, falling back to `UNKNOWN_ERROR`
    pub fn resolve(&self, code: &str) -> ErrorDefinition {
        self.get(code).unwrap_or_else(unknown_definition)
    }

    /// Whether a code is registered
    pub fn contains(&self, code: &str) -> bool {
        self.definitions.read().contains_key(code)
    }

    /// Registered codes, sorted
    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.definitions.read().keys().cloned().collect();
        codes.sort();
        codes
    }

    /// Code for an error: a registered explicit code wins, then keyword rules
    pub fn identify(&self, error: &ErrorDetails) -> String {
        if let Some(code) = error.code.as_deref() {
            if self.contains(code) {
                return code.to_string();
            }
        }
        classify_message(&error.message).to_string()
    }
}

impl Default for ErrorCatalog {
    fn default() -> Self {
        Self::new()
    }
}
