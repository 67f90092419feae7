//! Planner: utterance to ordered tool invocations
//!
//! An utterance is split into clauses; each clause is matched against the
//! argument grammars of the candidate tools to produce a step. Steps are
//! then ordered so that every step only consumes data tags already present
//! in the working state or provided by an earlier step.
//!
//! ```rust,no_run
//! use taxis_core::planner::Planner;
//! use taxis_core::tools::ToolCatalog;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = ToolCatalog::with_builtins()?;
//! let tools: Vec<_> = catalog.all().cloned().collect();
//! let plan = Planner::new().plan("read config.json and search for database settings", &tools)?;
//! assert_eq!(plan.tools(), vec!["read_file", "code_search"]);
//! # Ok(())
//! # }
//! ```

mod clause;
mod plan;

pub use clause::split_clauses;
pub use plan::{Plan, PlanStep};

use crate::context::ExecutionContext;
use crate::state::{DataTag, WorkingState};
use crate::tools::{BoxedTool, RiskLevel};
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;

/// Error type for planning and plan validation
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlanningError {
    /// A grammar matched but a required argument could not be extracted
    #[error("missing arguments for {tool}: {}", missing.join(", "))]
    MissingArgs {
        tool: String,
        clause: String,
        missing: Vec<String>,
    },

    /// A step's precondition does not hold
    #[error("unsatisfied precondition for {tool}: {condition} ({reason})")]
    UnsatisfiedPrecondition {
        tool: String,
        condition: String,
        reason: String,
    },

    /// No ordering satisfies the steps' data dependencies
    #[error("circular dependency between: {}", tools.join(", "))]
    CircularDependency { tools: Vec<String> },

    /// Aggregate budget exceeds the caller's quotas
    #[error("resource exceeded: {resource} requires {required}, limit {limit}")]
    ResourceExceeded {
        resource: String,
        required: u64,
        limit: u64,
    },

    /// No clause produced a step
    #[error("no valid operations found")]
    NoValidOperations,
}

impl PlanningError {
    /// Stable snake_case name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            PlanningError::MissingArgs { .. } => "missing_args",
            PlanningError::UnsatisfiedPrecondition { .. } => "unsatisfied_precondition",
            PlanningError::CircularDependency { .. } => "circular_dependency",
            PlanningError::ResourceExceeded { .. } => "resource_exceeded",
            PlanningError::NoValidOperations => "no_valid_operations",
        }
    }
}

/// Deterministic grammar-driven planner
#[derive(Debug, Clone, Default)]
pub struct Planner;

impl Planner {
    pub fn new() -> Self {
        Self
    }

    /// Plan against an empty working state
    pub fn plan(&self, utterance: &str, tools: &[BoxedTool]) -> Result<Plan, PlanningError> {
        self.plan_with_state(utterance, tools, &WorkingState::new())
    }

    /// Plan; tags already in `state` count as provided
    pub fn plan_with_state(
        &self,
        utterance: &str,
        tools: &[BoxedTool],
        state: &WorkingState,
    ) -> Result<Plan, PlanningError> {
        let mut steps = Vec::new();
        for clause in split_clauses(utterance) {
            match self.step_for_clause(&clause, tools)? {
                Some(step) => steps.push(step),
                None => tracing::debug!(clause = %clause, "No tool grammar matched clause"),
            }
        }
        if steps.is_empty() {
            return Err(PlanningError::NoValidOperations);
        }

        let steps = order_steps(steps, state.available_tags())?;

        let mut total_time_budget_ms = 0u64;
        let mut total_memory_budget_mb = 0u64;
        let mut risk_level = RiskLevel::Low;
        for step in &steps {
            if let Some(tool) = tools.iter().find(|t| t.name() == step.tool) {
                let spec = tool.spec();
                total_time_budget_ms = total_time_budget_ms.saturating_add(spec.time_budget_ms);
                total_memory_budget_mb =
                    total_memory_budget_mb.saturating_add(spec.memory_budget_mb);
                risk_level = risk_level.max(spec.risk);
            }
        }

        tracing::debug!(
            tools = ?steps.iter().map(|s| &s.tool).collect::<Vec<_>>(),
            risk = %risk_level,
            time_budget_ms = total_time_budget_ms,
            "Built plan"
        );

        Ok(Plan {
            steps,
            total_time_budget_ms,
            total_memory_budget_mb,
            risk_level,
        })
    }

    /// Check preconditions in order and the aggregate budget against quotas
    pub fn validate(
        &self,
        plan: &Plan,
        tools: &[BoxedTool],
        state: &WorkingState,
        ctx: &ExecutionContext,
    ) -> Result<(), PlanningError> {
        let mut provided = BTreeSet::new();
        for step in &plan.steps {
            if let Some(tool) = tools.iter().find(|t| t.name() == step.tool) {
                for condition in &tool.spec().preconditions {
                    condition.check_pre(&step.args, state, &provided).map_err(|reason| {
                        PlanningError::UnsatisfiedPrecondition {
                            tool: step.tool.clone(),
                            condition: condition.to_string(),
                            reason,
                        }
                    })?;
                }
            }
            provided.extend(step.provides.iter().copied());
        }

        let quotas = &ctx.quotas;
        if plan.total_time_budget_ms > quotas.max_cpu_time_ms {
            return Err(PlanningError::ResourceExceeded {
                resource: "cpu_time_ms".to_string(),
                required: plan.total_time_budget_ms,
                limit: quotas.max_cpu_time_ms,
            });
        }
        if plan.total_memory_budget_mb > quotas.max_memory_mb {
            return Err(PlanningError::ResourceExceeded {
                resource: "memory_mb".to_string(),
                required: plan.total_memory_budget_mb,
                limit: quotas.max_memory_mb,
            });
        }
        Ok(())
    }

    fn step_for_clause(
        &self,
        clause: &str,
        tools: &[BoxedTool],
    ) -> Result<Option<PlanStep>, PlanningError> {
        for tool in tools {
            let spec = tool.spec();
            let Some(args) = spec.grammar.as_ref().and_then(|g| g.extract(clause)) else {
                continue;
            };

            let missing: Vec<String> = spec
                .required_fields()
                .into_iter()
                .filter(|f| args.get(*f).is_none_or(Value::is_null))
                .map(str::to_string)
                .collect();
            if !missing.is_empty() {
                return Err(PlanningError::MissingArgs {
                    tool: spec.name.clone(),
                    clause: clause.to_string(),
                    missing,
                });
            }

            let provides: BTreeSet<DataTag> = spec.provides.iter().copied().collect();
            let mut consumes: BTreeSet<DataTag> = spec.consumes.iter().copied().collect();
            consumes.extend(
                back_references(&args)
                    .into_iter()
                    .filter(|tag| !provides.contains(tag)),
            );

            return Ok(Some(PlanStep {
                tool: spec.name.clone(),
                args,
                provides,
                consumes,
                order: 0,
            }));
        }
        Ok(None)
    }
}

/// Tags named inside string arguments
pub fn back_references(args: &Value) -> BTreeSet<DataTag> {
    let mut tags = BTreeSet::new();
    if let Some(map) = args.as_object() {
        for value in map.values() {
            if let Some(s) = value.as_str() {
                tags.extend(DataTag::referenced_in(s));
            }
        }
    }
    tags
}

/// Resolve execution order by repeated passes over the pending steps
fn order_steps(
    steps: Vec<PlanStep>,
    mut provided: BTreeSet<DataTag>,
) -> Result<Vec<PlanStep>, PlanningError> {
    let mut resolved: Vec<PlanStep> = Vec::with_capacity(steps.len());
    let mut remaining = steps;

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<PlanStep>, Vec<PlanStep>) = remaining
            .into_iter()
            .partition(|s| s.consumes.is_subset(&provided));

        if ready.is_empty() {
            return Err(PlanningError::CircularDependency {
                tools: blocked.into_iter().map(|s| s.tool).collect(),
            });
        }

        for mut step in ready {
            provided.extend(step.provides.iter().copied());
            step.order = resolved.len();
            resolved.push(step);
        }
        remaining = blocked;
    }

    Ok(resolved)
}
