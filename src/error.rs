//! Inventory Error Types
//!
//! Only [`ConfigError`] is allowed to escape a scan. Call and credential
//! failures are captured into the result tree.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Provider rate limit rejection
    Throttling,
    /// Network blip or generic backend error
    Transient,
    /// The per-call timeout elapsed
    Timeout,
    /// Access denied / unauthorized operation
    PermissionDenied,
    /// Bad parameters or unsupported request
    Validation,
    /// No invoker registered for the (service, operation) pair
    OperationNotFound,
    /// The scan was cancelled before this call started
    Cancelled,
    /// Anything uncategorized, including worker panics
    Unexpected,
}

impl ErrorKind {
    /// Whether the retry policy may attempt the call again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Throttling | ErrorKind::Transient | ErrorKind::Timeout
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Throttling => write!(f, "throttling"),
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::PermissionDenied => write!(f, "permission_denied"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::OperationNotFound => write!(f, "operation_not_found"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Unexpected => write!(f, "unexpected"),
        }
    }
}

/// A classified failure of a single provider call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct CallError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn throttling(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Throttling, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    pub fn operation_not_found(service: &str, operation: &str) -> Self {
        Self::new(
            ErrorKind::OperationNotFound,
            format!("Operation {} does not exist for service {}", operation, service),
        )
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Errors that can occur while resolving credentials for an account
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    /// Role missing or assumption denied
    #[error("Role {role_arn} cannot be assumed: {message}")]
    RoleNotAssumable { role_arn: String, message: String },

    /// Named profile missing or incomplete
    #[error("Invalid AWS profile '{profile}': {message}")]
    InvalidProfile { profile: String, message: String },

    /// No credentials could be found in the environment or shared files
    #[error("No AWS credentials found: {0}")]
    MissingCredentials(String),

    /// Network or backend failure while talking to the token service
    #[error("Transient credential error: {0}")]
    Transient(String),
}

impl CredentialError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CredentialError::Transient(_))
    }
}

/// Configuration problems surfaced before any scanning starts
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config file could not be parsed
    #[error("Failed to parse configuration {path}: {message}")]
    Parse { path: String, message: String },

    /// One or more semantic validation failures
    #[error("Configuration validation failed:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    /// The individual validation messages, if any
    pub fn messages(&self) -> Vec<String> {
        match self {
            ConfigError::Invalid(errors) => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Throttling.is_retryable());
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::PermissionDenied.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::OperationNotFound.is_retryable());
        assert!(!ErrorKind::Unexpected.is_retryable());
    }

    #[test]
    fn test_call_error_display() {
        let err = CallError::throttling("Rate exceeded");
        assert_eq!(err.to_string(), "throttling: Rate exceeded");

        let err = CallError::operation_not_found("ec2", "describe_nothing");
        assert_eq!(err.kind, ErrorKind::OperationNotFound);
        assert!(err.message.contains("describe_nothing"));
    }

    #[test]
    fn test_config_error_lists_all_messages() {
        let err = ConfigError::Invalid(vec!["first".to_string(), "second".to_string()]);
        let rendered = err.to_string();
        assert!(rendered.contains("  - first"));
        assert!(rendered.contains("  - second"));
        assert_eq!(err.messages().len(), 2);
    }

    #[test]
    fn test_credential_error_transient() {
        assert!(CredentialError::Transient("timeout".into()).is_transient());
        assert!(!CredentialError::RoleNotAssumable {
            role_arn: "arn:aws:iam::1:role/x".into(),
            message: "denied".into(),
        }
        .is_transient());
    }
}
