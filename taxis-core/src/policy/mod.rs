//! Policy layer: execution guards around a tool
//!
//! An [`ExecutionPolicy`] describes how a single tool call is guarded:
//! approval gate, sandbox, circuit breaker, and a retry loop whose every
//! attempt races a timeout and the turn's cancellation token. Defaults are
//! derived from the tool's risk tier.
//!
//! # Example
//!
//! ```rust,no_run
//! use taxis_core::policy::{with_policy, AutoApprove, ExecutionPolicy};
//! use taxis_core::tools::{RiskLevel, ToolCatalog};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = ToolCatalog::with_builtins()?;
//! let tool = catalog.require("write_file")?.clone();
//! let guarded = with_policy(tool, ExecutionPolicy::for_risk(RiskLevel::High))
//!     .with_approval(Arc::new(AutoApprove));
//! # Ok(())
//! # }
//! ```

mod approval;
mod circuit_breaker;
mod guarded;
mod retry;

pub use approval::{approve_with, ApprovalCallback, ApproveListed, AutoApprove, DenyAll, FnApproval, SharedApproval};
pub use circuit_breaker::{
    BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use guarded::{with_policy, CallOutcome, GuardedTool};
pub use retry::{with_retry, BackoffStrategy, RetryOutcome, RetrySettings};

use crate::safety::{canonical_json, SandboxConfig};
use crate::tools::{RiskLevel, ToolSpec};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// How one tool call is guarded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPolicy {
    /// Per-attempt timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Retries after the first attempt
    pub retries: u32,

    /// Delay growth between attempts
    pub backoff: BackoffStrategy,

    /// Base backoff delay
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Backoff cap
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Ask the approval callback before running
    pub require_approval: bool,

    /// Circuit breaker settings, if the call is breaker-guarded
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Sandbox settings, if the call is sandboxed
    pub sandbox: Option<SandboxConfig>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::for_risk(RiskLevel::Low)
    }
}

impl ExecutionPolicy {
    /// Default policy for a risk tier
    pub fn for_risk(risk: RiskLevel) -> Self {
        match risk {
            RiskLevel::Low => Self {
                timeout: Duration::from_secs(5),
                retries: 1,
                backoff: BackoffStrategy::None,
                base_delay: Duration::from_millis(100),
                max_backoff: Duration::from_secs(1),
                require_approval: false,
                circuit_breaker: None,
                sandbox: None,
            },
            RiskLevel::Medium => Self {
                timeout: Duration::from_secs(15),
                retries: 2,
                backoff: BackoffStrategy::Exponential,
                base_delay: Duration::from_millis(200),
                max_backoff: Duration::from_secs(5),
                require_approval: false,
                circuit_breaker: None,
                sandbox: None,
            },
            RiskLevel::High => Self {
                timeout: Duration::from_secs(30),
                retries: 3,
                backoff: BackoffStrategy::Exponential,
                base_delay: Duration::from_millis(500),
                max_backoff: Duration::from_secs(10),
                require_approval: true,
                circuit_breaker: Some(CircuitBreakerConfig::default()),
                sandbox: None,
            },
            RiskLevel::Critical => Self {
                timeout: Duration::from_secs(60),
                retries: 5,
                backoff: BackoffStrategy::Exponential,
                base_delay: Duration::from_secs(1),
                max_backoff: Duration::from_secs(30),
                require_approval: true,
                circuit_breaker: Some(CircuitBreakerConfig::sensitive()),
                sandbox: Some(SandboxConfig::offline()),
            },
        }
    }

    /// Builder: set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder: set retries
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Builder: set backoff
    pub fn with_backoff(
        mut self,
        backoff: BackoffStrategy,
        base_delay: Duration,
        max_backoff: Duration,
    ) -> Self {
        self.backoff = backoff;
        self.base_delay = base_delay;
        self.max_backoff = max_backoff;
        self
    }

    /// Builder: require approval
    pub fn with_approval(mut self, required: bool) -> Self {
        self.require_approval = required;
        self
    }

    /// Builder: set or clear the circuit breaker
    pub fn with_circuit_breaker(mut self, config: Option<CircuitBreakerConfig>) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Builder: set or clear the sandbox
    pub fn with_sandbox(mut self, sandbox: Option<SandboxConfig>) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Total attempts the retry loop may make
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Settings for the retry loop
    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            timeout: self.timeout,
            max_attempts: self.max_attempts(),
            backoff: self.backoff,
            base_delay: self.base_delay,
            max_backoff: self.max_backoff,
        }
    }

    /// Stable short hash identifying this policy
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_value(self)
            .map(|v| canonical_json(&v))
            .unwrap_or_else(|_| format!("{:?}", self));
        let digest = format!("{:x}", Sha256::digest(canonical.as_bytes()));
        digest[..16].to_string()
    }
}

/// Partial policy: only the fields that are set replace the base policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverride {
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,

    pub retries: Option<u32>,

    pub backoff: Option<BackoffStrategy>,

    #[serde(with = "humantime_serde")]
    pub base_delay: Option<Duration>,

    #[serde(with = "humantime_serde")]
    pub max_backoff: Option<Duration>,

    pub require_approval: Option<bool>,

    /// Replace the circuit breaker settings
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// `false` removes the circuit breaker, `true` adds the default one if absent
    pub circuit_breaker_enabled: Option<bool>,

    /// Replace the sandbox settings
    pub sandbox: Option<SandboxConfig>,

    /// `false` removes the sandbox, `true` adds the default one if absent
    pub sandbox_enabled: Option<bool>,
}

impl PolicyOverride {
    /// Apply the set fields on top of `base`
    pub fn apply(&self, mut base: ExecutionPolicy) -> ExecutionPolicy {
        if let Some(timeout) = self.timeout {
            base.timeout = timeout;
        }
        if let Some(retries) = self.retries {
            base.retries = retries;
        }
        if let Some(backoff) = self.backoff {
            base.backoff = backoff;
        }
        if let Some(delay) = self.base_delay {
            base.base_delay = delay;
        }
        if let Some(max) = self.max_backoff {
            base.max_backoff = max;
        }
        if let Some(required) = self.require_approval {
            base.require_approval = required;
        }
        if let Some(breaker) = &self.circuit_breaker {
            base.circuit_breaker = Some(breaker.clone());
        }
        match self.circuit_breaker_enabled {
            Some(false) => base.circuit_breaker = None,
            Some(true) if base.circuit_breaker.is_none() => {
                base.circuit_breaker = Some(CircuitBreakerConfig::default());
            }
            _ => {}
        }
        if let Some(sandbox) = &self.sandbox {
            base.sandbox = Some(sandbox.clone());
        }
        match self.sandbox_enabled {
            Some(false) => base.sandbox = None,
            Some(true) if base.sandbox.is_none() => base.sandbox = Some(SandboxConfig::default()),
            _ => {}
        }
        base
    }
}

/// Policy overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Adjust the default policy of a risk tier
    pub risk: BTreeMap<RiskLevel, PolicyOverride>,

    /// Adjust the policy of a single tool, on top of its tier
    pub tools: BTreeMap<String, PolicyOverride>,
}

impl PolicyConfig {
    /// Policy for a tool: tier default, then tier override, then tool override
    pub fn policy_for(&self, spec: &ToolSpec) -> ExecutionPolicy {
        let mut policy = ExecutionPolicy::for_risk(spec.risk);
        if let Some(tier) = self.risk.get(&spec.risk) {
            policy = tier.apply(policy);
        }
        if let Some(tool) = self.tools.get(&spec.name) {
            policy = tool.apply(policy);
        }
        policy
    }
}

#[cfg(test)]
mod tests;
