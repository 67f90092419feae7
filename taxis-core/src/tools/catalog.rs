//! Tool catalog: registration and lookup
//!
//! The catalog owns every registered tool for the lifetime of the
//! orchestrator. Tools are immutable once registered; iteration order is by
//! name so that routing and listings are deterministic.

use super::builtin;
use super::capability::CapabilitySet;
use super::tool::{BoxedTool, RiskLevel, Tool};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Error type for catalog operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CatalogError {
    /// Tool with this name already exists
    #[error("Tool '{0}' is already registered")]
    Duplicate(String),

    /// Tool not found
    #[error("Tool '{0}' not found")]
    NotFound(String),

    /// A tool's argument grammar failed to compile
    #[error("Invalid argument grammar for tool '{tool}': {message}")]
    InvalidGrammar { tool: String, message: String },
}

/// Summary of a tool for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSummary {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// Risk tier
    pub risk: RiskLevel,
    /// Declared capabilities
    pub capabilities: CapabilitySet,
    /// Time budget
    pub time_budget_ms: u64,
    /// Memory budget
    pub memory_budget_mb: u64,
}

impl From<&dyn Tool> for ToolSummary {
    fn from(tool: &dyn Tool) -> Self {
        let spec = tool.spec();
        Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            risk: spec.risk,
            capabilities: spec.capabilities.clone(),
            time_budget_ms: spec.time_budget_ms,
            memory_budget_mb: spec.memory_budget_mb,
        }
    }
}

/// Registry of tools available to the router and planner
#[derive(Default, Clone)]
pub struct ToolCatalog {
    tools: BTreeMap<String, BoxedTool>,
}

impl std::fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCatalog")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog holding the built-in tools
    pub fn with_builtins() -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        for tool in builtin::all()? {
            catalog.register(tool)?;
        }
        Ok(catalog)
    }

    /// Register a tool
    ///
    /// Returns an error if a tool with the same name is already registered.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), CatalogError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(CatalogError::Duplicate(name));
        }
        tracing::debug!(tool = %name, risk = %tool.spec().risk, "Registered tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Result<Self, CatalogError> {
        self.register(tool)?;
        Ok(self)
    }

    /// Unregister a tool by name
    pub fn unregister(&mut self, name: &str) -> Option<BoxedTool> {
        self.tools.remove(name)
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.get(name)
    }

    /// Get a tool by name, failing when it is unknown
    pub fn require(&self, name: &str) -> Result<&BoxedTool, CatalogError> {
        self.get(name)
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    /// Check if a tool is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tools, ordered by name
    pub fn all(&self) -> impl Iterator<Item = &BoxedTool> {
        self.tools.values()
    }

    /// All tool names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// List all tools with their summaries
    pub fn summaries(&self) -> Vec<ToolSummary> {
        self.tools
            .values()
            .map(|t| ToolSummary::from(t.as_ref()))
            .collect()
    }
}
