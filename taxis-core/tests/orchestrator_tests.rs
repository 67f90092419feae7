//! End-to-end tests for the orchestrator
//!
//! Each test runs real turns against the built-in tools inside a temporary
//! working directory.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taxis_core::observability::Outcome;
use taxis_core::policy::PolicyOverride;
use taxis_core::prelude::*;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn workspace() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(
        dir.path().join("config.json"),
        r#"{"database_url": "postgres://localhost/app"}"#,
    )
    .unwrap();
    std::fs::create_dir(dir.path().join("docs")).unwrap();
    std::fs::write(
        dir.path().join("docs/setup.md"),
        "# Setup\n\nDatabase settings live in config.json.\n",
    )
    .unwrap();
    dir
}

fn context(dir: &TempDir) -> ExecutionContext {
    ExecutionContext::new().with_working_dir(dir.path())
}

/// Catalog and router with one extra counting tool
fn counting_orchestrator(calls: Arc<AtomicUsize>, ttl: Duration) -> Orchestrator {
    let spec = ToolSpec::new("ping", "Echo a target")
        .with_input_schema(json!({
            "type": "object",
            "properties": { "target": { "type": "string" } },
            "required": ["target"]
        }))
        .with_grammar(ArgumentGrammar::new(r"\bping\s+(?P<target>\S+)").unwrap());
    let tool = HandlerTool::new(spec, move |args: Value| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ToolError>(json!({ "pong": args["target"] }))
        }
    });
    let catalog = ToolCatalog::with_builtins()
        .unwrap()
        .with_tool(Arc::new(tool))
        .unwrap();
    let router = Router::builder()
        .rule("ping_verb", r"\bping\b", "ping", 0.9)
        .unwrap()
        .build();

    Orchestrator::builder()
        .catalog(catalog)
        .router(router)
        .safety(SafetyConfig {
            idempotency_ttl: ttl,
            ..SafetyConfig::default()
        })
        .build()
        .unwrap()
}

/// Tool that sleeps for `delay`, then echoes its target
fn sleeping_tool(name: &str, delay: Duration, memory_mb: u64) -> BoxedTool {
    let spec = ToolSpec::new(name, "Sleep, then echo a target")
        .with_input_schema(json!({
            "type": "object",
            "properties": { "target": { "type": "string" } },
            "required": ["target"]
        }))
        .with_budget(100, memory_mb)
        .with_grammar(ArgumentGrammar::new(&format!(r"\b{}\s+(?P<target>\S+)", name)).unwrap());
    Arc::new(HandlerTool::new(spec, move |args: Value| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, ToolError>(json!({ "done": args["target"] }))
    }))
}

/// Orchestrator routing each tool's name to that tool
fn orchestrator_for(tools: Vec<BoxedTool>, policies: PolicyConfig, quotas: ResourceQuotas) -> Orchestrator {
    let mut catalog = ToolCatalog::with_builtins().unwrap();
    let mut router = Router::builder();
    for tool in tools {
        let name = tool.name().to_string();
        router = router
            .rule(&format!("{}_verb", name), &format!(r"\b{}\b", name), &name, 0.9)
            .unwrap();
        catalog.register(tool).unwrap();
    }
    Orchestrator::builder()
        .catalog(catalog)
        .router(router.build())
        .policies(policies)
        .safety(SafetyConfig {
            quotas,
            ..SafetyConfig::default()
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_read_and_search_scenario() {
    let dir = workspace();
    let orchestrator = Orchestrator::with_defaults().unwrap();

    let (state, result) = orchestrator
        .run_turn_with(
            WorkingState::new(),
            "read config.json and search for database settings",
            &context(&dir),
        )
        .await;

    assert!(result.success, "turn failed: {:?}", result.error);
    let tools: Vec<_> = result.results.iter().map(|r| r.tool.as_str()).collect();
    assert_eq!(tools, vec!["read_file", "code_search"]);
    assert!(result.results.iter().all(|r| r.success && !r.cached));

    let content = state.get(DataTag::FileContent).unwrap();
    assert!(content.as_str().unwrap().contains("database_url"));
    let matches = state.get(DataTag::SearchResults).unwrap().as_array().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(state.turn, 1);
    assert_eq!(state.history.len(), 2);

    let decision = orchestrator
        .observability()
        .get(result.decision_id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(decision.outcome, Outcome::Ok);
    assert_eq!(decision.patterns_matched, vec!["read_file_verb", "code_search_verb"]);
    assert_eq!(decision.chosen_tools, vec!["read_file", "code_search"]);
}

#[tokio::test]
async fn test_write_without_approval_fails() {
    let dir = workspace();
    let orchestrator = Orchestrator::with_defaults().unwrap();

    let (state, result) = orchestrator
        .run_turn_with(WorkingState::new(), "write hello to out.txt", &context(&dir))
        .await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("Approval required"));
    let step = &result.results[0];
    assert_eq!(step.error.as_ref().unwrap().kind, ToolErrorKind::ApprovalRequired);
    assert!(!step.error.as_ref().unwrap().is_retryable());
    assert_eq!(step.attempts, 0);
    assert!(!dir.path().join("out.txt").exists());
    assert!(!state.has(DataTag::FileWritten));

    let report = orchestrator.observability_report().await;
    assert_eq!(report.performance.failures, 1);
    assert_eq!(report.confusion.failure_categories["permission"], 1);
    assert_eq!(report.recent_decisions[0].outcome, Outcome::Fail);
}

#[tokio::test]
async fn test_state_flows_between_turns() {
    let dir = workspace();
    let orchestrator = Orchestrator::with_defaults()
        .unwrap()
        .with_approval(Arc::new(AutoApprove));
    let ctx = context(&dir);

    let (state, first) = orchestrator
        .run_turn_with(WorkingState::new(), "read docs/setup.md", &ctx)
        .await;
    assert!(first.success, "{:?}", first.error);

    let (state, second) = orchestrator
        .run_turn_with(state, "write file_content to copy.md", &ctx)
        .await;
    assert!(second.success, "{:?}", second.error);

    let copied = std::fs::read_to_string(dir.path().join("copy.md")).unwrap();
    assert!(copied.contains("Database settings live in config.json."));
    assert!(state.has(DataTag::FileWritten));
    assert_eq!(state.turn, 2);
}

#[tokio::test]
async fn test_idempotent_call_runs_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = counting_orchestrator(calls.clone(), Duration::from_secs(300));

    let (state, first) = orchestrator.run_turn(WorkingState::new(), "ping alpha").await;
    let (_, second) = orchestrator.run_turn(state, "ping alpha").await;

    assert!(first.success && second.success);
    assert!(!first.results[0].cached);
    assert!(second.results[0].cached);
    assert_eq!(second.results[0].output, Some(json!({ "pong": "alpha" })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.safety_status().idempotency_entries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_idempotency_expires_after_ttl() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = counting_orchestrator(calls.clone(), Duration::from_secs(5));

    let (state, _) = orchestrator.run_turn(WorkingState::new(), "ping beta").await;
    tokio::time::advance(Duration::from_secs(6)).await;
    let (_, again) = orchestrator.run_turn(state, "ping beta").await;

    assert!(!again.results[0].cached);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancelled_turn_runs_nothing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = counting_orchestrator(calls.clone(), Duration::from_secs(300));
    let token = CancellationToken::new();
    token.cancel();
    let ctx = ExecutionContext::new().with_cancellation(token);

    let (state, result) = orchestrator
        .run_turn_with(WorkingState::new(), "ping gamma", &ctx)
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Turn cancelled"));
    assert!(result.results.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(state.turn, 1);
    assert!(result.decision_id.is_some());
}

#[tokio::test]
async fn test_unplannable_message_is_recorded() {
    let orchestrator = Orchestrator::with_defaults().unwrap();
    let (_, result) = orchestrator
        .run_turn(WorkingState::new(), "what is inside the folder")
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("no valid operations found"));
    let report = orchestrator.observability_report().await;
    assert_eq!(report.confusion.total_decisions, 1);
    assert_eq!(report.confusion.pattern_decisions, 0);
}

#[tokio::test]
async fn test_quota_released_after_every_turn() {
    let dir = workspace();
    let orchestrator = Orchestrator::with_defaults().unwrap();
    let ctx = context(&dir);

    orchestrator
        .run_turn_with(WorkingState::new(), "read config.json", &ctx)
        .await;
    orchestrator
        .run_turn_with(WorkingState::new(), "read missing.json", &ctx)
        .await;
    orchestrator
        .run_turn_with(WorkingState::new(), "write x to y.txt", &ctx)
        .await;

    let status = orchestrator.safety_status();
    assert_eq!(status.usage.concurrency, 0);
    assert_eq!(status.usage.memory_mb, 0);
}

#[tokio::test(start_paused = true)]
async fn test_quota_released_after_timeout() {
    let mut policies = PolicyConfig::default();
    policies.tools.insert(
        "sleeper".to_string(),
        PolicyOverride {
            timeout: Some(Duration::from_millis(50)),
            retries: Some(0),
            ..PolicyOverride::default()
        },
    );
    let orchestrator = orchestrator_for(
        vec![sleeping_tool("sleeper", Duration::from_secs(10), 64)],
        policies,
        ResourceQuotas::default(),
    );

    let (_, result) = orchestrator.run_turn(WorkingState::new(), "sleeper one").await;

    assert!(!result.success);
    let step = &result.results[0];
    assert_eq!(step.error.as_ref().unwrap().kind, ToolErrorKind::Timeout);
    assert_eq!(step.attempts, 1);
    assert_eq!(orchestrator.safety_status().usage, ResourceUsage::default());
}

#[tokio::test(start_paused = true)]
async fn test_quota_released_when_cancelled_mid_step() {
    let orchestrator = orchestrator_for(
        vec![sleeping_tool("sleeper", Duration::from_secs(10), 64)],
        PolicyConfig::default(),
        ResourceQuotas::default(),
    );
    let token = CancellationToken::new();
    let ctx = ExecutionContext::new().with_cancellation(token.clone());

    let cancel = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(orchestrator.safety_status().usage.concurrency, 1);
        token.cancel();
    };
    let ((_, result), ()) = tokio::join!(
        orchestrator.run_turn_with(WorkingState::new(), "sleeper one", &ctx),
        cancel
    );

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Turn cancelled"));
    assert_eq!(
        result.results[0].error.as_ref().unwrap().kind,
        ToolErrorKind::Cancelled
    );
    assert_eq!(orchestrator.safety_status().usage, ResourceUsage::default());
}

#[tokio::test(start_paused = true)]
async fn test_quota_exhausted_mid_turn_is_reported_as_quota() {
    let orchestrator = orchestrator_for(
        vec![
            sleeping_tool("warmup", Duration::from_millis(100), 10),
            sleeping_tool("hog", Duration::from_secs(1), 60),
        ],
        PolicyConfig::default(),
        ResourceQuotas {
            max_memory_mb: 100,
            ..ResourceQuotas::default()
        },
    );

    // The first turn passes validation, then loses the race for memory to the second
    let ((_, starved), (_, hog)) = tokio::join!(
        orchestrator.run_turn(WorkingState::new(), "warmup a and then hog b"),
        orchestrator.run_turn(WorkingState::new(), "hog c"),
    );

    assert!(hog.success, "{:?}", hog.error);
    assert!(!starved.success);
    assert!(starved.results[0].success);
    let error = starved.results[1].error.as_ref().unwrap();
    assert_eq!(error.kind, ToolErrorKind::QuotaExceeded);
    assert!(!error.is_retryable());

    let report = orchestrator.observability_report().await;
    assert_eq!(report.confusion.failure_categories.get("quota"), Some(&1));
    assert!(!report.confusion.failure_categories.contains_key("permission"));
    assert_eq!(orchestrator.safety_status().usage, ResourceUsage::default());
}

#[tokio::test(start_paused = true)]
async fn test_idempotency_cache_stays_bounded() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = counting_orchestrator(calls.clone(), Duration::from_secs(1));

    let mut state = WorkingState::new();
    for i in 0..200 {
        let (next, result) = orchestrator.run_turn(state, &format!("ping t{}", i)).await;
        assert!(result.success, "{:?}", result.error);
        state = next;
        tokio::time::advance(Duration::from_secs(2)).await;
    }

    assert_eq!(calls.load(Ordering::SeqCst), 200);
    assert!(orchestrator.safety_status().idempotency_entries <= 1);
}

#[tokio::test]
async fn test_run_command_with_approval() {
    let dir = workspace();
    let orchestrator = Orchestrator::with_defaults()
        .unwrap()
        .with_approval(Arc::new(AutoApprove));

    let (state, result) = orchestrator
        .run_turn_with(WorkingState::new(), "run echo taxis-ok", &context(&dir))
        .await;

    assert!(result.success, "{:?}", result.error);
    let output = state.get(DataTag::CommandOutput).unwrap().as_str().unwrap();
    assert_eq!(output.trim(), "taxis-ok");
}

#[tokio::test]
async fn test_replay_failed_decision() {
    let dir = workspace();
    let orchestrator = Orchestrator::with_defaults().unwrap();
    let (_, result) = orchestrator
        .run_turn_with(WorkingState::new(), "write hello to out.txt", &context(&dir))
        .await;
    let id = result.decision_id.unwrap();

    let replay = orchestrator
        .replay(&id, |record| async move {
            assert_eq!(record.chosen_tools, vec!["write_file"]);
            Ok::<_, ToolError>(json!({ "file_written": record.args[0]["path"] }))
        })
        .await
        .unwrap();

    assert_eq!(replay.original_outcome, Outcome::Fail);
    assert_eq!(replay.outcome, Outcome::Ok);
    let report = orchestrator.observability_report().await;
    assert_eq!(report.replay_stats.fixed, 1);
    assert_eq!(
        orchestrator.observability().get(&id).await.unwrap().outcome,
        Outcome::Fail
    );
}

#[tokio::test]
async fn test_from_config_applies_policy_overrides() {
    let config = TaxisConfig::from_toml(
        r#"
        [policy.risk.high]
        require_approval = false
        "#,
    )
    .unwrap();
    let dir = workspace();
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    let (_, result) = orchestrator
        .run_turn_with(WorkingState::new(), "write hello to out.txt", &context(&dir))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
        "hello"
    );

    let policy = orchestrator.policy_for("write_file").unwrap();
    assert!(!policy.require_approval);
    assert_eq!(policy.retries, 3);
    assert_eq!(policy.timeout, Duration::from_secs(30));
    assert!(policy.circuit_breaker.is_some());
    let breakers = orchestrator.breaker_status();
    assert!(breakers.iter().any(|b| b.name.starts_with("write_file#")));
}

#[tokio::test]
async fn test_partial_critical_override_keeps_sandbox() {
    let config = TaxisConfig::from_toml(
        r#"
        [policy.risk.critical]
        require_approval = false
        "#,
    )
    .unwrap();
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    let policy = orchestrator.policy_for("run_command").unwrap();
    assert!(!policy.require_approval);
    assert_eq!(policy.retries, 5);
    assert_eq!(policy.timeout, Duration::from_secs(60));
    assert!(policy.circuit_breaker.is_some());
    assert!(policy.sandbox.is_some_and(|sandbox| !sandbox.network));
}
