//! # Taxis - deterministic tool orchestration
//!
//! Taxis decides, for one natural-language instruction, which tools to
//! invoke, in what order and under which constraints, then records the
//! outcome for audit and replay:
//! - Two-tier routing (pattern gate, then a linear classifier)
//! - Grammar-driven planning with data-dependency ordering
//! - Execution policies (approval, sandbox, circuit breaker, retry, timeout)
//! - Safety checks (allowlists, idempotency cache, resource quotas)
//! - A decision ledger with confusion analysis and replay
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taxis_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let orchestrator = Orchestrator::with_defaults()?;
//!     let ctx = ExecutionContext::new().with_working_dir(".");
//!
//!     let (state, result) = orchestrator
//!         .run_turn_with(
//!             WorkingState::new(),
//!             "read Cargo.toml and search for tokio",
//!             &ctx,
//!         )
//!         .await;
//!
//!     assert!(result.success);
//!     assert!(state.has(DataTag::FileContent));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod observability;
pub mod orchestrator;
pub mod planner;
pub mod policy;
pub mod router;
pub mod safety;
pub mod state;
pub mod tools;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::TaxisConfig;
    pub use crate::context::ExecutionContext;
    pub use crate::error::{Result, TaxisError};
    pub use crate::observability::{
        DecisionRecord, ObservabilityConfig, ObservabilityReport, Outcome, ReplayContext,
    };
    pub use crate::orchestrator::{ExecutionResult, Orchestrator, OrchestratorBuilder, StepResult};
    pub use crate::planner::{Plan, PlanStep, Planner, PlanningError};
    pub use crate::policy::{
        ApprovalCallback, AutoApprove, CircuitBreakerConfig, DenyAll, ExecutionPolicy,
        GuardedTool, PolicyConfig, PolicyOverride, with_policy,
    };
    pub use crate::router::{
        Classifier, LinearClassifier, MatchReason, Router, RouterCandidate, RoutingDecision,
    };
    pub use crate::safety::{
        ResourceQuotas, ResourceUsage, SafetyConfig, SafetyLayer, SafetyStatus, SafetyViolation,
        SafetyViolationKind,
    };
    pub use crate::state::{DataTag, WorkingState};
    pub use crate::tools::{
        ArgumentGrammar, BoxedTool, Capability, Condition, HandlerTool, RiskLevel, Tool,
        ToolCatalog, ToolError, ToolErrorKind, ToolSpec,
    };
}

pub use error::{Result, TaxisError};
