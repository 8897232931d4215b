//! Error types for the style guide pipeline.
//!
//! Library crates use [`StyleGuideError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Field-level conditions ([`StyleGuideError::ReviewCeilingExhausted`]) are
//! recorded on the flagged field and never returned from a run. Prefix and
//! aggregation conditions are fatal and surface as the run's single error.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum StyleGuideError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The generative backend failed (transport, HTTP status, empty response).
    #[error("capability error: {0}")]
    Capability(String),

    /// A capability or knowledge call exceeded its per-call timeout.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// A stage was invoked without an input its contract requires, or the
    /// graph declares an input nothing can provide. Never retried.
    #[error("contract violation in stage '{stage}': {message}")]
    ContractViolation { stage: String, message: String },

    /// A stage returned output that does not satisfy its output schema.
    #[error("stage '{stage}' failed: {reason}")]
    StageFailure { stage: String, reason: String },

    /// A field's review loop hit its iteration ceiling without approval.
    #[error("review ceiling exhausted for field '{field}' after {attempts} drafts")]
    ReviewCeilingExhausted { field: String, attempts: u32 },

    /// A shared prefix stage kept failing after its local retry budget.
    #[error("prefix stage '{stage}' failed after {attempts} attempts: {reason}")]
    PrefixFailure {
        stage: String,
        attempts: u32,
        reason: String,
    },

    /// Aggregation found schema-declared fields without a result.
    #[error("incomplete document: missing fields [{}]", .missing.join(", "))]
    IncompleteDocument { missing: Vec<String> },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad seed file, invalid request, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, StyleGuideError>;

impl StyleGuideError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a contract violation for `stage`.
    pub fn contract(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ContractViolation {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort the whole run.
    ///
    /// Stage failures and timeouts are absorbed by retry and iteration
    /// budgets; everything else propagates.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::StageFailure { .. }
                | Self::Timeout { .. }
                | Self::Capability(_)
                | Self::ReviewCeilingExhausted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = StyleGuideError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = StyleGuideError::PrefixFailure {
            stage: "schema_inference".into(),
            attempts: 2,
            reason: "missing output field 'fields'".into(),
        };
        assert_eq!(
            err.to_string(),
            "prefix stage 'schema_inference' failed after 2 attempts: missing output field 'fields'"
        );
    }

    #[test]
    fn incomplete_document_lists_missing_fields() {
        let err = StyleGuideError::IncompleteDocument {
            missing: vec!["title".into(), "longDesc".into()],
        };
        assert_eq!(
            err.to_string(),
            "incomplete document: missing fields [title, longDesc]"
        );
    }

    #[test]
    fn timeout_display_keeps_sub_second_precision() {
        let err = StyleGuideError::Timeout {
            operation: "stage 'legal_review'".into(),
            after: Duration::from_secs(120),
        };
        assert_eq!(err.to_string(), "stage 'legal_review' timed out after 120s");

        let err = StyleGuideError::Timeout {
            operation: "knowledge lookup".into(),
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "knowledge lookup timed out after 250ms");
    }

    #[test]
    fn fatality_classification() {
        assert!(StyleGuideError::contract("construction", "missing field").is_fatal());
        assert!(StyleGuideError::IncompleteDocument { missing: vec![] }.is_fatal());
        assert!(!StyleGuideError::Capability("503".into()).is_fatal());
        assert!(
            !StyleGuideError::ReviewCeilingExhausted {
                field: "title".into(),
                attempts: 3
            }
            .is_fatal()
        );
    }
}
