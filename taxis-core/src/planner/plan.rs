//! Plan and step types

use crate::state::DataTag;
use crate::tools::RiskLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// One tool invocation inside a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Tool name
    pub tool: String,
    /// Arguments extracted from the clause
    pub args: Value,
    /// Tags this step fills
    pub provides: BTreeSet<DataTag>,
    /// Tags this step needs
    pub consumes: BTreeSet<DataTag>,
    /// Position in execution order
    pub order: usize,
}

impl PlanStep {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
            provides: BTreeSet::new(),
            consumes: BTreeSet::new(),
            order: 0,
        }
    }

    pub fn providing(mut self, tag: DataTag) -> Self {
        self.provides.insert(tag);
        self
    }

    pub fn consuming(mut self, tag: DataTag) -> Self {
        self.consumes.insert(tag);
        self
    }
}

/// Ordered steps with aggregate budget and risk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Steps in execution order
    pub steps: Vec<PlanStep>,
    /// Sum of the tools' time budgets
    pub total_time_budget_ms: u64,
    /// Sum of the tools' memory budgets
    pub total_memory_budget_mb: u64,
    /// Highest risk among the steps
    pub risk_level: RiskLevel,
}

impl Plan {
    /// Tool names in execution order
    pub fn tools(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.tool.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether any step depends on another step of this plan
    pub fn has_dependencies(&self) -> bool {
        let provided: BTreeSet<DataTag> = self
            .steps
            .iter()
            .flat_map(|s| s.provides.iter().copied())
            .collect();
        self.steps
            .iter()
            .any(|s| s.consumes.iter().any(|t| provided.contains(t)))
    }
}
