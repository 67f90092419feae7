//! Orchestrator: one turn from instruction to recorded outcome
//!
//! A turn routes the message, plans over the top candidates, validates the
//! plan (planner preconditions and budgets, then safety checks), executes
//! the steps in order through their risk-derived policies and records the
//! decision. The caller always gets the updated state back, even when the
//! turn fails.

use crate::config::TaxisConfig;
use crate::context::ExecutionContext;
use crate::error::{Result, TaxisError};
use crate::observability::{
    DecisionParams, ObservabilityConfig, ObservabilityLayer, ObservabilityReport, ReplayContext,
};
use crate::planner::{Plan, Planner};
use crate::policy::{
    BreakerRegistry, BreakerSnapshot, ExecutionPolicy, GuardedTool, PolicyConfig, SharedApproval,
};
use crate::router::{Router, RoutingDecision};
use crate::safety::{SafetyConfig, SafetyLayer, SafetyStatus};
use crate::state::{DataTag, WorkingState};
use crate::tools::{BoxedTool, ToolCatalog, ToolError, ToolErrorKind, ToolSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Instant;

/// Number of router candidates handed to the planner
pub const DEFAULT_CANDIDATES: usize = 2;

/// Outcome of one executed (or short-circuited) plan step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub tool: String,
    /// Arguments after back-reference resolution
    pub args: Value,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<ToolError>,
    /// Attempts made by the retry loop (0 when served from cache or rejected)
    pub attempts: u32,
    /// Served from the idempotency cache
    pub cached: bool,
    pub duration_ms: u64,
}

/// Outcome of one turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub results: Vec<StepResult>,
    pub decision_id: Option<String>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    /// Output of the last successful step
    pub fn last_output(&self) -> Option<&Value> {
        self.results.iter().rev().find_map(|r| r.output.as_ref())
    }
}

/// What a turn got through before finishing or failing
#[derive(Default)]
struct TurnTrace {
    routing: Option<RoutingDecision>,
    plan: Option<Plan>,
    results: Vec<StepResult>,
}

/// Builder for [`Orchestrator`]
#[derive(Default)]
pub struct OrchestratorBuilder {
    catalog: Option<ToolCatalog>,
    router: Option<Router>,
    planner: Planner,
    safety: Option<SafetyLayer>,
    policies: PolicyConfig,
    approval: Option<SharedApproval>,
    observability: Option<ObservabilityLayer>,
    candidates: Option<usize>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tool catalog (defaults to the built-in tools)
    pub fn catalog(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Router (defaults to the built-in rules and weights)
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn planner(mut self, planner: Planner) -> Self {
        self.planner = planner;
        self
    }

    pub fn safety(mut self, config: SafetyConfig) -> Self {
        self.safety = Some(SafetyLayer::new(config));
        self
    }

    pub fn policies(mut self, policies: PolicyConfig) -> Self {
        self.policies = policies;
        self
    }

    /// Approval callback for policies that require approval
    pub fn approval(mut self, approval: SharedApproval) -> Self {
        self.approval = Some(approval);
        self
    }

    pub fn observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability = Some(ObservabilityLayer::new(config));
        self
    }

    /// Router candidates handed to the planner
    pub fn candidates(mut self, n: usize) -> Self {
        self.candidates = Some(n.max(1));
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => ToolCatalog::with_builtins()?,
        };
        let router = match self.router {
            Some(router) => router,
            None => Router::with_defaults()?,
        };
        Ok(Orchestrator {
            catalog,
            router,
            planner: self.planner,
            safety: self.safety.unwrap_or_default(),
            policies: self.policies,
            breakers: BreakerRegistry::new(),
            approval: self.approval,
            observability: self.observability.unwrap_or_default(),
            candidates: self.candidates.unwrap_or(DEFAULT_CANDIDATES),
        })
    }
}

/// Composition root
///
/// Holds every piece of cross-turn state (idempotency cache, breakers,
/// quota counters, decision ledger); several orchestrators can coexist.
pub struct Orchestrator {
    catalog: ToolCatalog,
    router: Router,
    planner: Planner,
    safety: SafetyLayer,
    policies: PolicyConfig,
    breakers: BreakerRegistry,
    approval: Option<SharedApproval>,
    observability: ObservabilityLayer,
    candidates: usize,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("catalog", &self.catalog)
            .field("router", &self.router)
            .field("candidates", &self.candidates)
            .field("has_approval", &self.approval.is_some())
            .finish()
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Orchestrator over the built-in tools with default settings
    pub fn with_defaults() -> Result<Self> {
        Self::builder().build()
    }

    /// Build every layer from configuration, over the built-in tools
    pub fn from_config(config: &TaxisConfig) -> Result<Self> {
        Self::from_config_with_catalog(config, ToolCatalog::with_builtins()?)
    }

    /// Build every layer from configuration, over a caller-supplied catalog
    pub fn from_config_with_catalog(config: &TaxisConfig, catalog: ToolCatalog) -> Result<Self> {
        config.validate()?;
        Self::builder()
            .catalog(catalog)
            .router(Router::from_config(&config.router)?)
            .candidates(config.router.top_k)
            .policies(config.policy.clone())
            .safety(config.safety.clone())
            .observability(config.observability.clone())
            .build()
    }

    /// Set or replace the approval callback
    pub fn with_approval(mut self, approval: SharedApproval) -> Self {
        self.approval = Some(approval);
        self
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn safety(&self) -> &SafetyLayer {
        &self.safety
    }

    pub fn observability(&self) -> &ObservabilityLayer {
        &self.observability
    }

    /// Effective policy for a catalog tool
    pub fn policy_for(&self, tool: &str) -> Option<ExecutionPolicy> {
        self.catalog
            .get(tool)
            .map(|tool| self.policies.policy_for(tool.spec()))
    }

    /// Run one turn with a default context
    pub async fn run_turn(&self, state: WorkingState, message: &str) -> (WorkingState, ExecutionResult) {
        self.run_turn_with(state, message, &ExecutionContext::new()).await
    }

    /// Run one turn
    ///
    /// Failures at any stage produce a failed result and a failed decision
    /// record; state updates from steps that succeeded before the failure
    /// are kept.
    pub async fn run_turn_with(
        &self,
        mut state: WorkingState,
        message: &str,
        ctx: &ExecutionContext,
    ) -> (WorkingState, ExecutionResult) {
        let started = Instant::now();
        tracing::info!(turn = state.turn, message = %message, "Starting turn");

        let mut trace = TurnTrace::default();
        let outcome = self.drive(&mut state, message, ctx, &mut trace).await;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let mut params = DecisionParams::new(message).with_latency_ms(execution_time_ms);
        if let Some(routing) = &trace.routing {
            params = params.with_routing(routing);
        }
        if let Some(plan) = &trace.plan {
            for (i, step) in plan.steps.iter().enumerate() {
                let args = trace
                    .results
                    .get(i)
                    .map(|r| r.args.clone())
                    .unwrap_or_else(|| step.args.clone());
                params = params.with_call(step.tool.clone(), args);
            }
        }
        let error = match &outcome {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(turn = state.turn, error = %e, "Turn failed");
                params = params.failed(e.to_string());
                Some(e.to_string())
            }
        };

        let decision_id = self.observability.record_decision(params).await;
        state.turn += 1;

        tracing::info!(
            decision_id = %decision_id,
            success = error.is_none(),
            steps = trace.results.len(),
            execution_time_ms,
            "Finished turn"
        );

        let result = ExecutionResult {
            success: error.is_none(),
            results: trace.results,
            decision_id: Some(decision_id),
            error,
            execution_time_ms,
        };
        (state, result)
    }

    async fn drive(
        &self,
        state: &mut WorkingState,
        message: &str,
        ctx: &ExecutionContext,
        trace: &mut TurnTrace,
    ) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(TaxisError::Cancelled);
        }

        let routing = self.router.route(message, &self.catalog).await;
        let tools: Vec<BoxedTool> = routing
            .candidates
            .iter()
            .take(self.candidates)
            .filter_map(|c| self.catalog.get(&c.tool).cloned())
            .collect();
        trace.routing = Some(routing);
        if tools.is_empty() {
            return Err(TaxisError::Routing(format!(
                "no tool candidates for '{}'",
                message
            )));
        }

        let plan = self.planner.plan_with_state(message, &tools, state)?;
        trace.plan = Some(plan.clone());
        self.planner.validate(&plan, &tools, state, ctx)?;

        for step in &plan.steps {
            let tool = self.catalog.require(&step.tool)?;
            self.safety
                .validate(tool.as_ref(), &step.args, ctx)
                .await
                .into_result()
                .map_err(TaxisError::Safety)?;
        }

        for step in &plan.steps {
            if ctx.is_cancelled() {
                return Err(TaxisError::Cancelled);
            }
            let tool = self.catalog.require(&step.tool)?.clone();
            let args = resolve_references(&step.args, state);
            let step_result = self.execute_step(tool, args, state, ctx).await;
            let failure = step_result.error.clone();
            trace.results.push(step_result);
            if let Some(error) = failure {
                return Err(match error.kind {
                    ToolErrorKind::Cancelled => TaxisError::Cancelled,
                    _ => TaxisError::Tool(error),
                });
            }
        }
        Ok(())
    }

    async fn execute_step(
        &self,
        tool: BoxedTool,
        args: Value,
        state: &mut WorkingState,
        ctx: &ExecutionContext,
    ) -> StepResult {
        let started = Instant::now();
        let name = tool.name().to_string();
        let mut result = StepResult {
            tool: name.clone(),
            args: args.clone(),
            success: false,
            output: None,
            error: None,
            attempts: 0,
            cached: false,
            duration_ms: 0,
        };

        if let Some(cached) = self.safety.cached_result(tool.as_ref(), &args) {
            tracing::debug!(tool = %name, "Idempotency cache hit");
            apply_output(state, tool.spec(), &cached);
            state.record_step(&name, true);
            result.success = true;
            result.cached = true;
            result.output = Some(cached);
            return result;
        }

        let reservation = match self.safety.reserve(tool.as_ref()) {
            Ok(reservation) => reservation,
            Err(violation) => {
                tracing::warn!(tool = %name, violation = %violation, "Quota reservation failed");
                state.record_step(&name, false);
                result.error = Some(ToolError::new(
                    ToolErrorKind::QuotaExceeded,
                    violation.to_string(),
                ));
                return result;
            }
        };

        let outcome = self.guard(tool.clone()).execute(args.clone(), ctx).await;
        reservation.release();
        result.attempts = outcome.attempts;
        result.duration_ms = started.elapsed().as_millis() as u64;

        let output = match outcome.result {
            Ok(output) => output,
            Err(error) => {
                tracing::warn!(tool = %name, error = %error, attempts = outcome.attempts, "Step failed");
                state.record_step(&name, false);
                result.error = Some(error);
                return result;
            }
        };

        let spec = tool.spec();
        for condition in &spec.postconditions {
            if let Err(reason) = condition.check_post(&output) {
                tracing::warn!(tool = %name, condition = %condition, "Postcondition failed");
                state.record_step(&name, false);
                result.error = Some(ToolError::validation(format!(
                    "Postcondition {} failed for {}: {}",
                    condition, name, reason
                )));
                result.output = Some(output);
                return result;
            }
        }

        self.safety.store_result(tool.as_ref(), &args, output.clone());
        apply_output(state, spec, &output);
        state.record_step(&name, true);
        result.success = true;
        result.output = Some(output);
        result
    }

    /// Wrap a tool with its policy, shared breaker and approval callback
    fn guard(&self, tool: BoxedTool) -> GuardedTool {
        let policy = self.policies.policy_for(tool.spec());
        let breaker = policy.circuit_breaker.as_ref().map(|config| {
            self.breakers
                .get_or_create(tool.name(), &policy.fingerprint(), config)
        });
        let mut guarded = GuardedTool::new(tool, policy);
        if let Some(breaker) = breaker {
            guarded = guarded.with_breaker(breaker);
        }
        if let Some(approval) = &self.approval {
            guarded = guarded.with_approval(approval.clone());
        }
        guarded
    }

    /// Confusion, performance and replay summaries
    pub async fn observability_report(&self) -> ObservabilityReport {
        self.observability.report().await
    }

    /// Quota usage and cache size
    pub fn safety_status(&self) -> SafetyStatus {
        self.safety.status()
    }

    /// State of every circuit breaker created so far
    pub fn breaker_status(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshot()
    }

    /// Re-run a recorded decision through `execute`
    pub async fn replay<F, Fut>(&self, decision_id: &str, execute: F) -> Result<ReplayContext>
    where
        F: FnOnce(crate::observability::DecisionRecord) -> Fut,
        Fut: Future<Output = std::result::Result<Value, ToolError>>,
    {
        self.observability.replay(decision_id, execute).await
    }
}

/// Replace string arguments naming a filled data slot with its content
fn resolve_references(args: &Value, state: &WorkingState) -> Value {
    let Value::Object(map) = args else {
        return args.clone();
    };
    let resolved = map
        .iter()
        .map(|(key, value)| {
            let replacement = value
                .as_str()
                .and_then(|s| s.trim().parse::<DataTag>().ok())
                .and_then(|tag| state.get(tag))
                .map(|data| match data {
                    Value::String(s) => Value::String(s.clone()),
                    other => Value::String(other.to_string()),
                });
            (key.clone(), replacement.unwrap_or_else(|| value.clone()))
        })
        .collect();
    Value::Object(resolved)
}

/// Store a step's output in the slots its tool provides
fn apply_output(state: &mut WorkingState, spec: &ToolSpec, output: &Value) {
    for tag in &spec.provides {
        let value = output
            .get(tag.as_str())
            .cloned()
            .unwrap_or_else(|| output.clone());
        state.set(*tag, value);
    }
}
