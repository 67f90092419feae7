//! Integration tests for the policy layer

use super::*;
use crate::context::ExecutionContext;
use crate::tools::{Capability, HandlerTool, Tool, ToolError, ToolErrorKind, ToolSpec};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Tool that fails with `error` for its first `failures` calls
struct ScriptedTool {
    spec: ToolSpec,
    failures: u32,
    error: ToolError,
    calls: AtomicU32,
}

impl ScriptedTool {
    fn new(failures: u32, error: ToolError) -> Arc<Self> {
        Arc::new(Self {
            spec: ToolSpec::new("scripted", "fails on cue").with_input_schema(json!({
                "type": "object",
                "properties": { "path": { "type": "string" } }
            })),
            failures,
            error,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Tool for ScriptedTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, _args: Value, ctx: &ExecutionContext) -> Result<Value, ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(self.error.clone())
        } else {
            Ok(json!({
                "call": n + 1,
                "working_dir": ctx.working_dir.as_ref().map(|p| p.display().to_string()),
            }))
        }
    }
}

fn fast(policy: ExecutionPolicy) -> ExecutionPolicy {
    policy.with_backoff(
        BackoffStrategy::Exponential,
        Duration::from_millis(10),
        Duration::from_millis(50),
    )
}

#[test]
fn test_risk_defaults() {
    let low = ExecutionPolicy::for_risk(RiskLevel::Low);
    assert_eq!(low.timeout, Duration::from_secs(5));
    assert_eq!(low.retries, 1);
    assert_eq!(low.backoff, BackoffStrategy::None);
    assert!(!low.require_approval && low.circuit_breaker.is_none());

    let medium = ExecutionPolicy::for_risk(RiskLevel::Medium);
    assert_eq!(medium.retries, 2);
    assert_eq!(medium.backoff, BackoffStrategy::Exponential);
    assert!(medium.timeout > low.timeout);

    let high = ExecutionPolicy::for_risk(RiskLevel::High);
    assert_eq!(high.retries, 3);
    assert!(high.require_approval);
    assert!(high.circuit_breaker.is_some());
    assert!(high.sandbox.is_none());

    let critical = ExecutionPolicy::for_risk(RiskLevel::Critical);
    assert_eq!(critical.retries, 5);
    assert_eq!(critical.max_attempts(), 6);
    assert!(critical.require_approval && critical.circuit_breaker.is_some());
    assert!(!critical.sandbox.as_ref().unwrap().network);
}

#[test]
fn test_fingerprint_is_stable_and_distinct() {
    let a = ExecutionPolicy::for_risk(RiskLevel::High);
    assert_eq!(a.fingerprint(), a.clone().fingerprint());
    assert_ne!(a.fingerprint(), a.clone().with_retries(9).fingerprint());
    assert_eq!(a.fingerprint().len(), 16);
}

#[test]
fn test_policy_config_overrides() {
    let config: PolicyConfig = serde_json::from_value(json!({
        "risk": { "low": { "timeout": "2s", "retries": 0 } },
        "tools": { "write_file": { "require_approval": false } }
    }))
    .unwrap();

    let low = ToolSpec::new("reader", "");
    assert_eq!(config.policy_for(&low).timeout, Duration::from_secs(2));
    assert_eq!(config.policy_for(&low).retries, 0);

    let write = ToolSpec::new("write_file", "").with_risk(RiskLevel::High);
    let policy = config.policy_for(&write);
    assert!(!policy.require_approval);
    assert_eq!(policy.retries, 3);
    assert_eq!(policy.backoff, BackoffStrategy::Exponential);
    assert!(policy.circuit_breaker.is_some());

    let other_high = ToolSpec::new("deploy", "").with_risk(RiskLevel::High);
    assert_eq!(
        config.policy_for(&other_high),
        ExecutionPolicy::for_risk(RiskLevel::High)
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retried() {
    let tool = ScriptedTool::new(2, ToolError::transient("flaky"));
    let guarded = with_policy(tool.clone(), fast(ExecutionPolicy::for_risk(RiskLevel::Medium)));

    let outcome = guarded.execute(json!({}), &ExecutionContext::new()).await;
    assert_eq!(outcome.result.unwrap()["call"], 3);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(tool.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted() {
    let tool = ScriptedTool::new(10, ToolError::transient("down"));
    let guarded = with_policy(tool.clone(), fast(ExecutionPolicy::for_risk(RiskLevel::Medium)));

    let outcome = guarded.execute(json!({}), &ExecutionContext::new()).await;
    assert_eq!(outcome.result.unwrap_err().kind, ToolErrorKind::Transient);
    assert_eq!(tool.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_permission_errors_not_retried() {
    let tool = ScriptedTool::new(10, ToolError::internal("Permission denied"));
    let guarded = with_policy(tool.clone(), fast(ExecutionPolicy::for_risk(RiskLevel::Medium)));

    assert!(guarded.call(json!({}), &ExecutionContext::new()).await.is_err());
    assert_eq!(tool.calls(), 1);
}

#[tokio::test]
async fn test_approval_denied_is_terminal_and_skips_tool() {
    let tool = ScriptedTool::new(0, ToolError::transient("unused"));
    let policy = ExecutionPolicy::for_risk(RiskLevel::High);

    let no_callback = with_policy(tool.clone(), policy.clone());
    let outcome = no_callback.execute(json!({}), &ExecutionContext::new()).await;
    let error = outcome.result.unwrap_err();
    assert_eq!(error.kind, ToolErrorKind::ApprovalRequired);
    assert!(!error.is_retryable());
    assert!(error.message.to_lowercase().contains("approval required"));
    assert_eq!(outcome.attempts, 0);

    let denied = with_policy(tool.clone(), policy.clone()).with_approval(Arc::new(DenyAll));
    assert!(denied.call(json!({}), &ExecutionContext::new()).await.is_err());
    assert_eq!(tool.calls(), 0);

    let approved = with_policy(tool.clone(), policy).with_approval(Arc::new(AutoApprove));
    assert!(approved.call(json!({}), &ExecutionContext::new()).await.is_ok());
    assert_eq!(tool.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_and_recovers() {
    let tool = ScriptedTool::new(3, ToolError::transient("boom"));
    let policy = ExecutionPolicy::for_risk(RiskLevel::Low)
        .with_retries(0)
        .with_circuit_breaker(Some(
            CircuitBreakerConfig::default()
                .with_failure_threshold(3)
                .with_recovery_timeout(Duration::from_secs(30)),
        ));
    let guarded = with_policy(tool.clone(), policy);
    let ctx = ExecutionContext::new();

    for _ in 0..3 {
        assert!(guarded.call(json!({}), &ctx).await.is_err());
    }
    assert_eq!(guarded.breaker().unwrap().state(), CircuitState::Open);

    let rejected = guarded.execute(json!({}), &ctx).await;
    assert_eq!(rejected.result.unwrap_err().kind, ToolErrorKind::CircuitOpen);
    assert_eq!(rejected.attempts, 0);
    assert_eq!(tool.calls(), 3);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(guarded.call(json!({}), &ctx).await.is_ok());
    assert_eq!(guarded.breaker().unwrap().state(), CircuitState::Closed);
    assert_eq!(tool.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_counts_one_outcome_per_call() {
    let tool = ScriptedTool::new(100, ToolError::transient("boom"));
    let policy = fast(ExecutionPolicy::for_risk(RiskLevel::Low))
        .with_retries(4)
        .with_circuit_breaker(Some(CircuitBreakerConfig::default().with_failure_threshold(2)));
    let guarded = with_policy(tool.clone(), policy);

    assert!(guarded.call(json!({}), &ExecutionContext::new()).await.is_err());
    assert_eq!(tool.calls(), 5);
    assert_eq!(guarded.breaker().unwrap().failure_count(), 1);
    assert_eq!(guarded.breaker().unwrap().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_shared_breaker_from_registry() {
    let registry = BreakerRegistry::new();
    let policy = ExecutionPolicy::for_risk(RiskLevel::Low)
        .with_retries(0)
        .with_circuit_breaker(Some(CircuitBreakerConfig::default().with_failure_threshold(1)));
    let config = policy.circuit_breaker.clone().unwrap();

    let tool = ScriptedTool::new(1, ToolError::transient("boom"));
    let first = with_policy(tool.clone(), policy.clone()).with_breaker(registry.get_or_create(
        "scripted",
        &policy.fingerprint(),
        &config,
    ));
    assert!(first.call(json!({}), &ExecutionContext::new()).await.is_err());

    let second = with_policy(tool.clone(), policy.clone()).with_breaker(registry.get_or_create(
        "scripted",
        &policy.fingerprint(),
        &config,
    ));
    let error = second.call(json!({}), &ExecutionContext::new()).await.unwrap_err();
    assert_eq!(error.kind, ToolErrorKind::CircuitOpen);
    assert_eq!(tool.calls(), 1);
}

#[tokio::test]
async fn test_sandbox_rejects_escaping_path_and_sets_working_dir() {
    let tool = ScriptedTool::new(0, ToolError::transient("unused"));
    let policy = ExecutionPolicy::for_risk(RiskLevel::Low)
        .with_sandbox(Some(crate::safety::SandboxConfig::default().with_root("/srv/box")));
    let guarded = with_policy(tool.clone(), policy);
    let ctx = ExecutionContext::new();

    let error = guarded
        .call(json!({"path": "../../etc/passwd"}), &ctx)
        .await
        .unwrap_err();
    assert_eq!(error.kind, ToolErrorKind::Sandbox);
    assert_eq!(tool.calls(), 0);

    let out = guarded.call(json!({"path": "data.txt"}), &ctx).await.unwrap();
    assert_eq!(out["working_dir"], "/srv/box");
}

#[tokio::test]
async fn test_offline_sandbox_rejects_network_tools() {
    let spec = ToolSpec::new("fetch", "").with_capability(Capability::Network);
    let tool = Arc::new(HandlerTool::new(spec, |_args: Value| async {
        Ok::<_, ToolError>(json!("fetched"))
    }));
    let policy = ExecutionPolicy::for_risk(RiskLevel::Critical);
    let guarded = with_policy(tool, policy).with_approval(Arc::new(AutoApprove));

    let error = guarded.call(json!({}), &ExecutionContext::new()).await.unwrap_err();
    assert_eq!(error.kind, ToolErrorKind::Sandbox);
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn test_validation_happens_before_execution() {
    let spec = ToolSpec::new("strict", "").with_input_schema(json!({
        "type": "object",
        "properties": { "name": { "type": "string" } },
        "required": ["name"]
    }));
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let tool = Arc::new(HandlerTool::new(spec, move |_args: Value| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ToolError>(json!(null))
        }
    }));

    let guarded = with_policy(tool, ExecutionPolicy::for_risk(RiskLevel::Medium));
    let error = guarded.call(json!({}), &ExecutionContext::new()).await.unwrap_err();
    assert_eq!(error.kind, ToolErrorKind::Validation);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancelled_context_never_runs() {
    let tool = ScriptedTool::new(0, ToolError::transient("unused"));
    let guarded = with_policy(tool.clone(), ExecutionPolicy::default());
    let ctx = ExecutionContext::new();
    ctx.cancellation.cancel();

    let error = guarded.call(json!({}), &ctx).await.unwrap_err();
    assert_eq!(error.kind, ToolErrorKind::Cancelled);
    assert_eq!(tool.calls(), 0);
}

#[test]
fn test_tool_override_layers_on_tier_override() {
    let config: PolicyConfig = serde_json::from_value(json!({
        "risk": { "critical": { "timeout": "90s" } },
        "tools": { "run_command": { "retries": 1, "sandbox": { "network": true } } }
    }))
    .unwrap();

    let spec = ToolSpec::new("run_command", "").with_risk(RiskLevel::Critical);
    let policy = config.policy_for(&spec);
    assert_eq!(policy.timeout, Duration::from_secs(90));
    assert_eq!(policy.retries, 1);
    assert!(policy.require_approval);
    assert!(policy.sandbox.as_ref().is_some_and(|s| s.network));
    assert_eq!(policy.circuit_breaker, Some(CircuitBreakerConfig::sensitive()));
}
