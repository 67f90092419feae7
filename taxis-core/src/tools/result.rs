//! Tool error model
//!
//! Every failure a tool invocation can produce, including the ones the policy
//! layer synthesizes (timeouts, open breakers, refused approvals), is a
//! `ToolError`. The kind decides whether the retry loop may try again.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Structured tool error with taxonomy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    /// Error kind (determines retryability)
    pub kind: ToolErrorKind,

    /// Human-readable error message
    pub message: String,

    /// Stable error code
    pub code: Option<String>,

    /// Additional context
    pub context: Option<Value>,
}

impl ToolError {
    /// Create a new tool error
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            context: None,
        }
    }

    /// Add an error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Add context
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Invalid arguments or a failed pre/postcondition
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Validation, message).with_code("VALIDATION_FAILED")
    }

    /// Execution timed out
    pub fn timeout(duration: Duration) -> Self {
        Self::new(
            ToolErrorKind::Timeout,
            format!("Tool execution timed out after {}ms", duration.as_millis()),
        )
        .with_code("TIMEOUT")
    }

    /// The circuit breaker for this tool is open
    pub fn circuit_open(tool_name: &str) -> Self {
        Self::new(
            ToolErrorKind::CircuitOpen,
            format!("Circuit breaker is open for tool '{}'", tool_name),
        )
        .with_code("CIRCUIT_OPEN")
    }

    /// The approval callback refused (or no approval was available)
    pub fn approval_required(tool_name: &str) -> Self {
        Self::new(
            ToolErrorKind::ApprovalRequired,
            format!("Approval required for tool '{}' was not granted", tool_name),
        )
        .with_code("APPROVAL_REQUIRED")
    }

    /// Sandbox refused the arguments or the capability
    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Sandbox, message).with_code("SANDBOX_VIOLATION")
    }

    /// Execution was cancelled
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Cancelled, message).with_code("CANCELLED")
    }

    /// Transient failure worth retrying
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Transient, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, message).with_code("INTERNAL_ERROR")
    }

    /// Whether the retry loop may try again
    ///
    /// Terminal kinds never retry. For the remaining kinds the message is
    /// also inspected, since tools often surface permission problems from
    /// lower layers as plain internal errors.
    pub fn is_retryable(&self) -> bool {
        if self.kind.is_terminal() {
            return false;
        }
        let message = self.message.to_lowercase();
        !TERMINAL_MESSAGE_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
    }
}

/// Message fragments that mark an error as non-retryable
const TERMINAL_MESSAGE_MARKERS: &[&str] = &[
    "validation",
    "permission",
    "unauthorized",
    "forbidden",
    "circuit breaker",
    "approval required",
];

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ToolError {}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ToolErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ToolErrorKind::PermissionDenied,
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                ToolErrorKind::Validation
            }
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted => {
                ToolErrorKind::Transient
            }
            _ => ToolErrorKind::Internal,
        };
        ToolError::new(kind, err.to_string())
    }
}

/// Error kind taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Input validation failed
    Validation,

    /// Permission denied by the environment
    PermissionDenied,

    /// Caller is not authenticated
    Unauthorized,

    /// Caller is authenticated but not allowed
    Forbidden,

    /// Circuit breaker rejected the call
    CircuitOpen,

    /// Approval was required and not granted
    ApprovalRequired,

    /// Sandbox rejected the call
    Sandbox,

    /// A resource quota had no room left for the call
    QuotaExceeded,

    /// Cancelled by user/system
    Cancelled,

    /// Execution timed out
    Timeout,

    /// Transient environment failure
    Transient,

    /// Resource not found
    NotFound,

    /// Internal tool error
    Internal,
}

impl ToolErrorKind {
    /// Kinds that must never be retried
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolErrorKind::Validation
                | ToolErrorKind::PermissionDenied
                | ToolErrorKind::Unauthorized
                | ToolErrorKind::Forbidden
                | ToolErrorKind::CircuitOpen
                | ToolErrorKind::ApprovalRequired
                | ToolErrorKind::Sandbox
                | ToolErrorKind::QuotaExceeded
                | ToolErrorKind::Cancelled
        )
    }

    /// Get the string name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorKind::Validation => "validation",
            ToolErrorKind::PermissionDenied => "permission_denied",
            ToolErrorKind::Unauthorized => "unauthorized",
            ToolErrorKind::Forbidden => "forbidden",
            ToolErrorKind::CircuitOpen => "circuit_open",
            ToolErrorKind::ApprovalRequired => "approval_required",
            ToolErrorKind::Sandbox => "sandbox",
            ToolErrorKind::QuotaExceeded => "quota_exceeded",
            ToolErrorKind::Cancelled => "cancelled",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::Transient => "transient",
            ToolErrorKind::NotFound => "not_found",
            ToolErrorKind::Internal => "internal",
        }
    }
}

#[cfg(test)]
mod result_tests {
    use super::*;

    #[test]
    fn test_terminal_kinds_never_retry() {
        let terminal = [
            ToolErrorKind::Validation,
            ToolErrorKind::PermissionDenied,
            ToolErrorKind::Unauthorized,
            ToolErrorKind::Forbidden,
            ToolErrorKind::CircuitOpen,
            ToolErrorKind::ApprovalRequired,
            ToolErrorKind::Sandbox,
            ToolErrorKind::QuotaExceeded,
            ToolErrorKind::Cancelled,
        ];
        for kind in terminal {
            assert!(!ToolError::new(kind, "x").is_retryable(), "{:?}", kind);
        }
    }

    #[test]
    fn test_other_kinds_retry() {
        assert!(ToolError::timeout(Duration::from_millis(10)).is_retryable());
        assert!(ToolError::transient("connection reset").is_retryable());
        assert!(ToolError::internal("boom").is_retryable());
    }

    #[test]
    fn test_message_markers_block_retry() {
        let error = ToolError::internal("upstream said: 403 Forbidden");
        assert!(!error.is_retryable());

        let error = ToolError::transient("Permission denied (os error 13)");
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_io_error_mapping() {
        let err: ToolError = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert_eq!(err.kind, ToolErrorKind::NotFound);

        let err: ToolError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope").into();
        assert_eq!(err.kind, ToolErrorKind::PermissionDenied);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_includes_kind() {
        let error = ToolError::approval_required("write_file");
        assert!(error.to_string().starts_with("[approval_required]"));
        assert!(error.to_string().contains("write_file"));
    }
}
