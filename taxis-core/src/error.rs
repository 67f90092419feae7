//! Error types for Taxis operations

use crate::planner::PlanningError;
use crate::safety::SafetyViolation;
use crate::tools::{CatalogError, ToolError};

/// Result type for Taxis operations
pub type Result<T> = std::result::Result<T, TaxisError>;

/// Error types for the orchestration engine
#[derive(Debug, thiserror::Error)]
pub enum TaxisError {
    /// Planning failed before any tool ran
    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    /// One or more safety checks rejected a step
    #[error("Safety violation: {}", format_violations(.0))]
    Safety(Vec<SafetyViolation>),

    /// A tool invocation failed
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Tool catalog error
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Routing produced nothing usable
    #[error("Routing error: {0}")]
    Routing(String),

    /// Decision record not found
    #[error("Decision not found: {0}")]
    DecisionNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Turn was cancelled
    #[error("Turn cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

fn format_violations(violations: &[SafetyViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<String> for TaxisError {
    fn from(s: String) -> Self {
        TaxisError::Other(s)
    }
}

impl From<&str> for TaxisError {
    fn from(s: &str) -> Self {
        TaxisError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for TaxisError {
    fn from(err: anyhow::Error) -> Self {
        TaxisError::Other(err.to_string())
    }
}
