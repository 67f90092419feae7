//! Tool system
//!
//! Tools are named, schema-validated capabilities with a declared risk tier,
//! resource budgets, data dependencies and an argument grammar. The catalog
//! owns them; the policy and safety layers guard every call.
//!
//! # Example
//!
//! ```rust,no_run
//! use taxis_core::tools::ToolCatalog;
//!
//! let catalog = ToolCatalog::with_builtins()?;
//! assert!(catalog.get("read_file").is_some());
//! # Ok::<(), taxis_core::tools::CatalogError>(())
//! ```

pub mod builtin;
mod capability;
mod catalog;
mod result;
mod tool;

pub use capability::{Capability, CapabilitySet};
pub use catalog::{CatalogError, ToolCatalog, ToolSummary};
pub use result::{ToolError, ToolErrorKind};
pub use tool::{
    ArgumentGrammar, BoxedTool, Condition, HandlerTool, RiskLevel, Tool, ToolHandler, ToolSpec,
};
