//! A tool wrapped in its execution policy

use super::approval::SharedApproval;
use super::circuit_breaker::CircuitBreaker;
use super::retry::with_retry;
use super::ExecutionPolicy;
use crate::context::ExecutionContext;
use crate::safety::{SandboxValidator, HOST_ARGS, PATH_ARGS};
use crate::tools::{BoxedTool, Capability, ToolError, ToolErrorKind};
use serde_json::Value;
use std::sync::Arc;

/// Wrap `tool` with `policy`
///
/// A breaker configured by the policy gets a private instance; use
/// [`GuardedTool::with_breaker`] to share one through a registry.
pub fn with_policy(tool: BoxedTool, policy: ExecutionPolicy) -> GuardedTool {
    GuardedTool::new(tool, policy)
}

/// Result of a guarded call
#[derive(Debug)]
pub struct CallOutcome {
    pub result: Result<Value, ToolError>,
    /// Underlying executions attempted (0 when a gate rejected the call)
    pub attempts: u32,
}

/// Tool plus the guards its policy asks for
pub struct GuardedTool {
    tool: BoxedTool,
    policy: ExecutionPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
    approval: Option<SharedApproval>,
}

impl std::fmt::Debug for GuardedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedTool")
            .field("tool", &self.tool.name())
            .field("policy", &self.policy)
            .field("breaker", &self.breaker.as_ref().map(|b| b.name().to_string()))
            .field("has_approval", &self.approval.is_some())
            .finish()
    }
}

impl GuardedTool {
    pub fn new(tool: BoxedTool, policy: ExecutionPolicy) -> Self {
        let breaker = policy.circuit_breaker.as_ref().map(|config| {
            Arc::new(CircuitBreaker::new(
                format!("{}#{}", tool.name(), policy.fingerprint()),
                config.clone(),
            ))
        });
        Self {
            tool,
            policy,
            breaker,
            approval: None,
        }
    }

    /// Use a shared breaker instead of the private one
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        if self.policy.circuit_breaker.is_some() {
            self.breaker = Some(breaker);
        }
        self
    }

    /// Set the approval callback
    pub fn with_approval(mut self, approval: SharedApproval) -> Self {
        self.approval = Some(approval);
        self
    }

    pub fn tool(&self) -> &BoxedTool {
        &self.tool
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Call the tool, returning only its result
    pub async fn call(&self, args: Value, ctx: &ExecutionContext) -> Result<Value, ToolError> {
        self.execute(args, ctx).await.result
    }

    /// Call the tool through every guard
    ///
    /// Order: cancellation, approval, argument validation, sandbox, circuit
    /// breaker, then the retry loop. Gate rejections never reach the tool.
    pub async fn execute(&self, args: Value, ctx: &ExecutionContext) -> CallOutcome {
        let name = self.tool.name();
        let rejected = |error: ToolError| CallOutcome {
            result: Err(error),
            attempts: 0,
        };

        if ctx.is_cancelled() {
            return rejected(ToolError::cancelled("Cancelled before execution"));
        }

        if self.policy.require_approval {
            let approved = match &self.approval {
                Some(callback) => callback.approve(name, &args).await,
                None => false,
            };
            if !approved {
                tracing::warn!(tool = %name, "Approval not granted");
                return rejected(ToolError::approval_required(name));
            }
        }

        if let Err(error) = self.tool.validate(&args) {
            return rejected(error);
        }

        let call_ctx = match self.sandboxed_context(&args, ctx) {
            Ok(call_ctx) => call_ctx,
            Err(error) => {
                tracing::warn!(tool = %name, error = %error, "Sandbox rejected call");
                return rejected(error);
            }
        };

        if let Some(breaker) = &self.breaker
            && !breaker.try_acquire()
        {
            return rejected(ToolError::circuit_open(name));
        }

        let settings = self.policy.retry_settings();
        let outcome = with_retry(name, &settings, &ctx.cancellation, |attempt| {
            tracing::debug!(tool = %name, attempt, "Executing tool");
            self.tool.execute(args.clone(), &call_ctx)
        })
        .await;

        if let Some(breaker) = &self.breaker {
            match &outcome.result {
                Ok(_) => breaker.record_success(),
                Err(e) if e.kind == ToolErrorKind::Cancelled => breaker.record_abandoned(),
                Err(_) => breaker.record_failure(),
            }
        }

        CallOutcome {
            result: outcome.result,
            attempts: outcome.attempts,
        }
    }

    /// Validate arguments against the policy's sandbox and build the
    /// context the tool runs in
    fn sandboxed_context(
        &self,
        args: &Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionContext, ToolError> {
        let Some(config) = &self.policy.sandbox else {
            return Ok(ctx.clone());
        };
        let validator = SandboxValidator::new(config.clone());
        let root = validator
            .effective_root(ctx.working_dir.as_deref())
            .map(|p| p.to_path_buf());

        let network = config.network && ctx.network_allowed;
        if !network && self.tool.spec().capabilities.contains(Capability::Network) {
            return Err(ToolError::sandbox(format!(
                "Sandbox disables network access required by '{}'",
                self.tool.name()
            )));
        }

        for key in PATH_ARGS {
            if let Some(raw) = args.get(*key).and_then(|v| v.as_str()) {
                validator
                    .validate_path(raw, root.as_deref())
                    .map_err(ToolError::sandbox)?;
            }
        }
        for key in HOST_ARGS {
            if let Some(raw) = args.get(*key).and_then(|v| v.as_str()) {
                if !network {
                    return Err(ToolError::sandbox(format!(
                        "Sandbox disables network access to '{}'",
                        raw
                    )));
                }
                validator.validate_host(raw).map_err(ToolError::sandbox)?;
            }
        }

        let mut sandboxed = ctx.clone().with_network(network);
        if let Some(root) = root {
            sandboxed = sandboxed.with_working_dir(root);
        }
        Ok(sandboxed)
    }
}
