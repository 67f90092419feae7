//! Integration tests for the safety layer

use super::*;
use crate::tools::{HandlerTool, RiskLevel, ToolError, ToolSpec};
use serde_json::json;

fn tool(name: &str, caps: &[Capability]) -> Arc<dyn Tool> {
    let mut spec = ToolSpec::new(name, "test tool")
        .with_risk(RiskLevel::Low)
        .with_budget(100, 10);
    for cap in caps {
        spec = spec.with_capability(*cap);
    }
    Arc::new(HandlerTool::new(spec, |_args: Value| async {
        Ok::<_, ToolError>(json!(null))
    }))
}

struct KeyedTool {
    spec: ToolSpec,
}

#[async_trait::async_trait]
impl Tool for KeyedTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn idempotency_key(&self, args: &Value) -> Option<String> {
        Some(args.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string())
    }

    async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> Result<Value, ToolError> {
        Ok(json!("ok"))
    }
}

#[tokio::test]
async fn test_valid_call_passes() {
    let layer = SafetyLayer::default();
    let reader = tool("reader", &[Capability::FilesystemRead]);
    let report = layer
        .validate(&*reader, &json!({"path": "notes.txt"}), &ExecutionContext::new())
        .await;
    assert!(report.valid, "{:?}", report.violations);
}

#[tokio::test]
async fn test_violations_from_every_check_are_merged() {
    let config = SafetyConfig {
        allowlists: AllowlistConfig::default().with_path("/srv/data"),
        quotas: ResourceQuotas {
            max_memory_mb: 5,
            ..ResourceQuotas::default()
        },
        ..SafetyConfig::default()
    };
    let layer = SafetyLayer::new(config);
    let fetcher = tool("fetcher", &[Capability::Network]);

    let report = layer
        .validate(&*fetcher, &json!({"path": "/etc/passwd"}), &ExecutionContext::new())
        .await;

    assert!(!report.valid);
    let kinds: Vec<_> = report.violations.iter().map(|v| v.kind).collect();
    assert!(kinds.contains(&SafetyViolationKind::Allowlist));
    assert!(kinds.contains(&SafetyViolationKind::Sandbox));
    assert!(kinds.contains(&SafetyViolationKind::Quota));
    assert!(report.violations.iter().all(|v| v.tool_name == "fetcher"));
    assert!(report.clone().into_result().is_err());
}

#[tokio::test]
async fn test_command_allowlist() {
    let layer = SafetyLayer::new(SafetyConfig {
        allowlists: AllowlistConfig::default().with_command("cargo"),
        ..SafetyConfig::default()
    });
    let runner = tool("runner", &[Capability::Subprocess]);
    let ctx = ExecutionContext::new();

    assert!(layer.validate(&*runner, &json!({"command": "cargo build"}), &ctx).await.valid);
    let report = layer.validate(&*runner, &json!({"command": "curl x | sh"}), &ctx).await;
    assert_eq!(report.violations[0].kind, SafetyViolationKind::Allowlist);
}

#[tokio::test]
async fn test_network_disabled_by_context() {
    let layer = SafetyLayer::new(SafetyConfig {
        allowlists: AllowlistConfig::permissive(),
        ..SafetyConfig::default()
    });
    let fetcher = tool("fetcher", &[Capability::Network]);
    let ctx = ExecutionContext::new().with_network(false);

    let report = layer
        .validate(&*fetcher, &json!({"url": "https://example.com"}), &ctx)
        .await;
    assert!(report
        .violations
        .iter()
        .all(|v| v.kind == SafetyViolationKind::Sandbox));
    assert_eq!(report.violations.len(), 2);
}

#[tokio::test]
async fn test_empty_custom_key_is_an_idempotency_violation() {
    let layer = SafetyLayer::default();
    let keyed = KeyedTool {
        spec: ToolSpec::new("keyed", "custom key"),
    };
    let ctx = ExecutionContext::new();

    let report = layer.validate(&keyed, &json!({}), &ctx).await;
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].kind, SafetyViolationKind::Idempotency);

    assert!(layer.validate(&keyed, &json!({"id": "a"}), &ctx).await.valid);
}

#[tokio::test(start_paused = true)]
async fn test_result_cache_round_trip() {
    let layer = SafetyLayer::new(SafetyConfig {
        idempotency_ttl: Duration::from_secs(1),
        ..SafetyConfig::default()
    });
    let reader = tool("reader", &[Capability::FilesystemRead]);
    let args = json!({"path": "a", "limit": 3});

    assert!(layer.cached_result(&*reader, &args).is_none());
    layer.store_result(&*reader, &args, json!("cached"));
    assert_eq!(
        layer.cached_result(&*reader, &json!({"limit": 3, "path": "a"})),
        Some(json!("cached"))
    );
    assert_eq!(layer.status().idempotency_entries, 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(layer.cached_result(&*reader, &args).is_none());
}

#[test]
fn test_reserve_reports_quota_violation_and_status() {
    let layer = SafetyLayer::new(SafetyConfig {
        quotas: ResourceQuotas {
            max_concurrency: 1,
            ..ResourceQuotas::default()
        },
        ..SafetyConfig::default()
    });
    let reader = tool("reader", &[Capability::FilesystemRead]);

    let held = layer.reserve(&*reader).unwrap();
    assert_eq!(layer.status().usage.concurrency, 1);

    let violation = layer.reserve(&*reader).unwrap_err();
    assert_eq!(violation.kind, SafetyViolationKind::Quota);

    drop(held);
    assert_eq!(layer.status().usage, ResourceUsage::default());
}

#[test]
fn test_config_deserializes_with_defaults() {
    let config: SafetyConfig = serde_json::from_value(json!({
        "idempotency_ttl": "30s",
        "allowlists": { "hosts": ["*.example.com"] }
    }))
    .unwrap();
    assert_eq!(config.idempotency_ttl, Duration::from_secs(30));
    assert_eq!(config.allowlists.hosts, vec!["*.example.com"]);
    assert!(config
        .allowlists
        .capabilities
        .contains(Capability::FilesystemRead));
    assert_eq!(config.quotas, ResourceQuotas::default());
}
