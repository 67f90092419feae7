//! Approval callbacks for gated tools

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Decides whether a gated tool call may proceed
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    /// Return `true` to allow the call
    async fn approve(&self, tool_name: &str, args: &Value) -> bool;
}

/// Shared approval callback
pub type SharedApproval = Arc<dyn ApprovalCallback>;

/// Approves everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalCallback for AutoApprove {
    async fn approve(&self, _tool_name: &str, _args: &Value) -> bool {
        true
    }
}

/// Refuses everything
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl ApprovalCallback for DenyAll {
    async fn approve(&self, _tool_name: &str, _args: &Value) -> bool {
        false
    }
}

/// Approves only the listed tools
#[derive(Debug, Clone, Default)]
pub struct ApproveListed {
    tools: BTreeSet<String>,
}

impl ApproveListed {
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: tools.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ApprovalCallback for ApproveListed {
    async fn approve(&self, tool_name: &str, _args: &Value) -> bool {
        self.tools.contains(tool_name)
    }
}

/// Approval decided by a synchronous closure
pub struct FnApproval<F>(F);

/// Wrap a closure as an approval callback
pub fn approve_with<F>(f: F) -> FnApproval<F>
where
    F: Fn(&str, &Value) -> bool + Send + Sync,
{
    FnApproval(f)
}

#[async_trait]
impl<F> ApprovalCallback for FnApproval<F>
where
    F: Fn(&str, &Value) -> bool + Send + Sync,
{
    async fn approve(&self, tool_name: &str, args: &Value) -> bool {
        (self.0)(tool_name, args)
    }
}

#[cfg(test)]
mod approval_tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_builtin_callbacks() {
        assert!(AutoApprove.approve("x", &json!({})).await);
        assert!(!DenyAll.approve("x", &json!({})).await);

        let listed = ApproveListed::new(["write_file"]);
        assert!(listed.approve("write_file", &json!({})).await);
        assert!(!listed.approve("run_command", &json!({})).await);
    }

    #[tokio::test]
    async fn test_closure_sees_args() {
        let only_tmp = approve_with(|_tool, args: &Value| {
            args.get("path")
                .and_then(|p| p.as_str())
                .is_some_and(|p| p.starts_with("/tmp/"))
        });
        assert!(only_tmp.approve("write_file", &json!({"path": "/tmp/a"})).await);
        assert!(!only_tmp.approve("write_file", &json!({"path": "/home/a"})).await);
    }
}
