//! Per-turn execution context
//!
//! Carries the caller's identity, resource ceilings and the single
//! cancellation signal every suspension point observes.

use crate::safety::ResourceQuotas;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Context for one orchestration turn (and every tool call inside it)
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Agent ID making the call
    pub agent_id: Option<String>,

    /// Trace ID for correlation
    pub trace_id: Option<String>,

    /// Resource ceilings the caller grants this turn
    pub quotas: ResourceQuotas,

    /// Cancellation token shared by the whole turn
    pub cancellation: CancellationToken,

    /// Directory relative paths resolve against
    pub working_dir: Option<PathBuf>,

    /// Whether tools may use the network
    pub network_allowed: bool,

    /// Additional context values
    pub extra: Value,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            agent_id: None,
            trace_id: None,
            quotas: ResourceQuotas::default(),
            cancellation: CancellationToken::new(),
            working_dir: None,
            network_allowed: true,
            extra: Value::Null,
        }
    }
}

impl ExecutionContext {
    /// Create a new context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set agent ID
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Set trace ID
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Set resource ceilings
    pub fn with_quotas(mut self, quotas: ResourceQuotas) -> Self {
        self.quotas = quotas;
        self
    }

    /// Set cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Set working directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Allow or forbid network use
    pub fn with_network(mut self, allowed: bool) -> Self {
        self.network_allowed = allowed;
        self
    }

    /// Add extra context
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolve a tool-supplied path against the working directory
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        match &self.working_dir {
            Some(dir) if candidate.is_relative() => dir.join(candidate),
            _ => candidate.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_path() {
        let ctx = ExecutionContext::new().with_working_dir("/srv/work");
        assert_eq!(ctx.resolve_path("a/b.txt"), PathBuf::from("/srv/work/a/b.txt"));
        assert_eq!(ctx.resolve_path("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_resolve_without_working_dir() {
        let ctx = ExecutionContext::new();
        assert_eq!(ctx.resolve_path("x.json"), PathBuf::from("x.json"));
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let ctx = ExecutionContext::new().with_cancellation(token.clone());
        let cloned = ctx.clone();
        assert!(!cloned.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(cloned.is_cancelled());
    }
}
