//! Safety violations
//!
//! Produced while validating a step, reported in the turn's result and
//! never stored beyond it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which check produced a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyViolationKind {
    Allowlist,
    Quota,
    Sandbox,
    Idempotency,
}

impl SafetyViolationKind {
    /// Get the string name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyViolationKind::Allowlist => "allowlist",
            SafetyViolationKind::Quota => "quota",
            SafetyViolationKind::Sandbox => "sandbox",
            SafetyViolationKind::Idempotency => "idempotency",
        }
    }
}

impl std::fmt::Display for SafetyViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A rejected safety check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind} violation for '{tool_name}': {message}")]
pub struct SafetyViolation {
    /// Check that failed
    pub kind: SafetyViolationKind,
    /// Human-readable explanation
    pub message: String,
    /// Tool being validated
    pub tool_name: String,
    /// Structured details (offending value, limit, ...)
    pub details: Value,
}

impl SafetyViolation {
    /// Create a violation without details
    pub fn new(
        kind: SafetyViolationKind,
        tool_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            tool_name: tool_name.into(),
            details: Value::Null,
        }
    }

    /// Attach details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}
