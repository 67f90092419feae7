//! Safety layer: the pre-execution gate
//!
//! Before a step runs, its tool and arguments are checked against the
//! allowlists, the sandbox, the idempotency key rules and the shared quota
//! counters. The checks are independent, so they run concurrently and their
//! violations are merged into one [`SafetyReport`].

mod allowlist;
mod idempotency;
mod quota;
mod sandbox;
mod violation;

pub use allowlist::{wildcard_match, AllowlistConfig};
pub use idempotency::{
    cache_key, canonical_json, key_for, IdempotencyCache, DEFAULT_IDEMPOTENCY_TTL,
};
pub use quota::{
    QuotaExceeded, QuotaManager, QuotaReservation, Resource, ResourceQuotas, ResourceRequest,
    ResourceUsage,
};
pub use sandbox::{
    host_of, normalize_path, SandboxConfig, SandboxValidator, COMMAND_ARGS, HOST_ARGS, PATH_ARGS,
};
pub use violation::{SafetyViolation, SafetyViolationKind};

use crate::context::ExecutionContext;
use crate::tools::{Capability, Tool};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Safety layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Allowlists
    pub allowlists: AllowlistConfig,

    /// Global sandbox rules applied to every call
    pub sandbox: SandboxConfig,

    /// Shared quota ceilings
    pub quotas: ResourceQuotas,

    /// Idempotency cache TTL
    #[serde(with = "humantime_serde")]
    pub idempotency_ttl: Duration,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            allowlists: AllowlistConfig::default(),
            sandbox: SandboxConfig::default(),
            quotas: ResourceQuotas::default(),
            idempotency_ttl: DEFAULT_IDEMPOTENCY_TTL,
        }
    }
}

/// Outcome of [`SafetyLayer::validate`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyReport {
    pub valid: bool,
    pub violations: Vec<SafetyViolation>,
}

impl SafetyReport {
    fn from_violations(violations: Vec<SafetyViolation>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }

    /// Convert into a `Result`
    pub fn into_result(self) -> Result<(), Vec<SafetyViolation>> {
        if self.valid {
            Ok(())
        } else {
            Err(self.violations)
        }
    }
}

/// Snapshot of the shared safety state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyStatus {
    pub quotas: ResourceQuotas,
    pub usage: ResourceUsage,
    pub idempotency_entries: usize,
    #[serde(with = "humantime_serde")]
    pub idempotency_ttl: Duration,
}

/// String values of `args` under any of `keys`
fn string_args<'a>(args: &'a Value, keys: &[&str]) -> Vec<&'a str> {
    keys.iter()
        .filter_map(|k| args.get(*k).and_then(|v| v.as_str()))
        .collect()
}

/// Pre-execution gate shared by every turn of one orchestrator
#[derive(Debug)]
pub struct SafetyLayer {
    allowlists: AllowlistConfig,
    sandbox: SandboxValidator,
    quotas: Arc<QuotaManager>,
    idempotency: IdempotencyCache,
}

impl Default for SafetyLayer {
    fn default() -> Self {
        Self::new(SafetyConfig::default())
    }
}

impl SafetyLayer {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            allowlists: config.allowlists,
            sandbox: SandboxValidator::new(config.sandbox),
            quotas: QuotaManager::new(config.quotas),
            idempotency: IdempotencyCache::new(config.idempotency_ttl),
        }
    }

    /// Shared quota manager
    pub fn quotas(&self) -> &Arc<QuotaManager> {
        &self.quotas
    }

    /// Global sandbox validator
    pub fn sandbox(&self) -> &SandboxValidator {
        &self.sandbox
    }

    /// Idempotency cache
    pub fn idempotency(&self) -> &IdempotencyCache {
        &self.idempotency
    }

    /// Validate one call; every check runs and all violations are reported
    pub async fn validate(
        &self,
        tool: &dyn Tool,
        args: &Value,
        ctx: &ExecutionContext,
    ) -> SafetyReport {
        let (allowlist, sandbox, quota, idempotency) = tokio::join!(
            async { self.check_allowlists(tool, args, ctx) },
            async { self.check_sandbox(tool, args, ctx) },
            async { self.check_quota(tool) },
            async { self.check_idempotency(tool, args) },
        );

        let violations: Vec<SafetyViolation> = allowlist
            .into_iter()
            .chain(sandbox)
            .chain(quota)
            .chain(idempotency)
            .collect();

        if !violations.is_empty() {
            tracing::warn!(
                tool = %tool.name(),
                violations = violations.len(),
                "Safety validation failed"
            );
        }
        SafetyReport::from_violations(violations)
    }

    fn check_allowlists(
        &self,
        tool: &dyn Tool,
        args: &Value,
        ctx: &ExecutionContext,
    ) -> Vec<SafetyViolation> {
        let name = tool.name();
        let mut violations = Vec::new();

        let missing = self
            .allowlists
            .missing_capabilities(&tool.spec().capabilities);
        if !missing.is_empty() {
            violations.push(
                SafetyViolation::new(
                    SafetyViolationKind::Allowlist,
                    name,
                    format!("capabilities not allowed: {}", missing),
                )
                .with_details(json!({ "capabilities": missing })),
            );
        }

        for raw in string_args(args, PATH_ARGS) {
            let path = normalize_path(&ctx.resolve_path(raw));
            if !self.allowlists.permits_path(&path) {
                violations.push(
                    SafetyViolation::new(
                        SafetyViolationKind::Allowlist,
                        name,
                        format!("path '{}' is not allowlisted", raw),
                    )
                    .with_details(json!({ "path": path.display().to_string() })),
                );
            }
        }

        for raw in string_args(args, HOST_ARGS) {
            let host = host_of(raw);
            if !self.allowlists.permits_host(host) {
                violations.push(
                    SafetyViolation::new(
                        SafetyViolationKind::Allowlist,
                        name,
                        format!("host '{}' is not allowlisted", host),
                    )
                    .with_details(json!({ "host": host })),
                );
            }
        }

        for command in string_args(args, COMMAND_ARGS) {
            if !self.allowlists.permits_command(command) {
                violations.push(
                    SafetyViolation::new(
                        SafetyViolationKind::Allowlist,
                        name,
                        "command is not allowlisted",
                    )
                    .with_details(json!({ "command": command })),
                );
            }
        }

        violations
    }

    fn check_sandbox(
        &self,
        tool: &dyn Tool,
        args: &Value,
        ctx: &ExecutionContext,
    ) -> Vec<SafetyViolation> {
        let name = tool.name();
        let mut violations = Vec::new();

        let network_disabled = !self.sandbox.config().network || !ctx.network_allowed;
        if network_disabled && tool.spec().capabilities.contains(Capability::Network) {
            violations.push(SafetyViolation::new(
                SafetyViolationKind::Sandbox,
                name,
                "tool requires network access but network is disabled",
            ));
        }

        let root = ctx.working_dir.as_deref();
        for raw in string_args(args, PATH_ARGS) {
            if let Err(message) = self.sandbox.validate_path(raw, root) {
                violations.push(
                    SafetyViolation::new(SafetyViolationKind::Sandbox, name, message)
                        .with_details(json!({ "path": raw })),
                );
            }
        }
        if ctx.network_allowed {
            for raw in string_args(args, HOST_ARGS) {
                if let Err(message) = self.sandbox.validate_host(raw) {
                    violations.push(
                        SafetyViolation::new(SafetyViolationKind::Sandbox, name, message)
                            .with_details(json!({ "host": raw })),
                    );
                }
            }
        } else if let Some(raw) = string_args(args, HOST_ARGS).first() {
            violations.push(
                SafetyViolation::new(
                    SafetyViolationKind::Sandbox,
                    name,
                    "network access is disabled for this turn",
                )
                .with_details(json!({ "host": raw })),
            );
        }

        violations
    }

    fn check_quota(&self, tool: &dyn Tool) -> Vec<SafetyViolation> {
        let request = ResourceRequest::for_tool(tool.spec());
        match self.quotas.can_reserve(&request) {
            Ok(()) => Vec::new(),
            Err(exceeded) => vec![
                SafetyViolation::new(SafetyViolationKind::Quota, tool.name(), exceeded.to_string())
                    .with_details(json!(exceeded)),
            ],
        }
    }

    fn check_idempotency(&self, tool: &dyn Tool, args: &Value) -> Vec<SafetyViolation> {
        match tool.idempotency_key(args) {
            Some(key) if key.trim().is_empty() => vec![SafetyViolation::new(
                SafetyViolationKind::Idempotency,
                tool.name(),
                "tool produced an empty idempotency key",
            )],
            _ => Vec::new(),
        }
    }

    /// Live cached result for this call, if any
    pub fn cached_result(&self, tool: &dyn Tool, args: &Value) -> Option<Value> {
        self.idempotency.lookup(&key_for(tool, args))
    }

    /// Cache a successful result for this call
    pub fn store_result(&self, tool: &dyn Tool, args: &Value, result: Value) {
        self.idempotency.store(key_for(tool, args), result);
    }

    /// Reserve quota for one execution of `tool`
    pub fn reserve(&self, tool: &dyn Tool) -> Result<QuotaReservation, SafetyViolation> {
        self.quotas
            .reserve(ResourceRequest::for_tool(tool.spec()))
            .map_err(|exceeded| {
                SafetyViolation::new(SafetyViolationKind::Quota, tool.name(), exceeded.to_string())
                    .with_details(json!(exceeded))
            })
    }

    /// Snapshot of quotas, usage and cache size
    pub fn status(&self) -> SafetyStatus {
        SafetyStatus {
            quotas: self.quotas.quotas(),
            usage: self.quotas.usage(),
            idempotency_entries: self.idempotency.len(),
            idempotency_ttl: self.idempotency.ttl(),
        }
    }
}

#[cfg(test)]
mod tests;
