//! Tool trait and descriptor definitions
//!
//! A tool is a named capability with declared risk, resource budgets,
//! data dependencies and an argument grammar the planner uses to turn a
//! clause of text into call arguments.

use super::capability::{Capability, CapabilitySet};
use super::result::ToolError;
use crate::context::ExecutionContext;
use crate::state::{DataTag, WorkingState};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Risk tier of a tool (ordered: low < medium < high < critical)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Read-only, side-effect free
    #[default]
    Low,
    /// Limited side effects
    Medium,
    /// Modifies user data
    High,
    /// Arbitrary execution
    Critical,
}

impl RiskLevel {
    /// Get the string name of this level
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pre- or postcondition attached to a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// The working state (or an earlier step) must provide this tag
    RequiresData { tag: DataTag },

    /// The argument must be present and non-empty
    ArgPresent { field: String },

    /// The string argument must match a regex
    ArgMatches { field: String, pattern: String },

    /// The tool output must contain this field
    OutputField { field: String },
}

impl Condition {
    /// Evaluate as a precondition
    ///
    /// `provided` holds tags that earlier steps of the same plan will fill.
    pub fn check_pre(
        &self,
        args: &Value,
        state: &WorkingState,
        provided: &BTreeSet<DataTag>,
    ) -> Result<(), String> {
        match self {
            Condition::RequiresData { tag } => {
                if state.has(*tag) || provided.contains(tag) {
                    Ok(())
                } else {
                    Err(format!("requires '{}' in working state", tag))
                }
            }
            Condition::ArgPresent { field } => match args.get(field) {
                Some(Value::String(s)) if !s.trim().is_empty() => Ok(()),
                Some(v) if !v.is_null() && !v.is_string() => Ok(()),
                _ => Err(format!("argument '{}' must be present", field)),
            },
            Condition::ArgMatches { field, pattern } => {
                let regex = Regex::new(pattern)
                    .map_err(|e| format!("invalid pattern '{}': {}", pattern, e))?;
                match args.get(field).and_then(|v| v.as_str()) {
                    Some(value) if regex.is_match(value) => Ok(()),
                    _ => Err(format!("argument '{}' must match '{}'", field, pattern)),
                }
            }
            Condition::OutputField { .. } => Ok(()),
        }
    }

    /// Evaluate as a postcondition against the tool output
    pub fn check_post(&self, output: &Value) -> Result<(), String> {
        match self {
            Condition::OutputField { field } => match output.get(field) {
                Some(v) if !v.is_null() => Ok(()),
                _ => Err(format!("output is missing field '{}'", field)),
            },
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::RequiresData { tag } => write!(f, "requires_data({})", tag),
            Condition::ArgPresent { field } => write!(f, "arg_present({})", field),
            Condition::ArgMatches { field, pattern } => {
                write!(f, "arg_matches({}, {})", field, pattern)
            }
            Condition::OutputField { field } => write!(f, "output_field({})", field),
        }
    }
}

/// Regex grammar that pulls call arguments out of a clause
///
/// Named capture groups become string arguments; surrounding quotes are
/// stripped. Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct ArgumentGrammar {
    regex: Regex,
    defaults: Map<String, Value>,
}

impl ArgumentGrammar {
    /// Compile a grammar
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("(?i){}", pattern))?;
        Ok(Self {
            regex,
            defaults: Map::new(),
        })
    }

    /// Builder: default value for an argument the pattern may not capture
    pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }

    /// The compiled pattern
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Extract arguments, or `None` when the clause does not match
    pub fn extract(&self, clause: &str) -> Option<Value> {
        let captures = self.regex.captures(clause)?;
        let mut args = self.defaults.clone();
        for name in self.regex.capture_names().flatten() {
            if let Some(m) = captures.name(name) {
                let value = strip_quotes(m.as_str().trim());
                if !value.is_empty() {
                    args.insert(name.to_string(), Value::String(value.to_string()));
                }
            }
        }
        Some(Value::Object(args))
    }
}

fn strip_quotes(s: &str) -> &str {
    let trimmed = s.trim_matches(|c| c == '"' || c == '\'' || c == '`');
    trimmed.trim()
}

/// Static descriptor of a tool
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Tool name (unique identifier)
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// JSON Schema for input arguments
    pub input_schema: Value,

    /// JSON Schema for the output value
    pub output_schema: Value,

    /// Capabilities the tool needs
    pub capabilities: CapabilitySet,

    /// Risk tier
    pub risk: RiskLevel,

    /// Expected upper bound on execution time
    pub time_budget_ms: u64,

    /// Expected upper bound on memory use
    pub memory_budget_mb: u64,

    /// Checked against args and state before execution
    pub preconditions: Vec<Condition>,

    /// Checked against the output after execution
    pub postconditions: Vec<Condition>,

    /// State slots the tool fills
    pub provides: Vec<DataTag>,

    /// State slots the tool always reads
    pub consumes: Vec<DataTag>,

    /// Grammar used by the planner
    pub grammar: Option<ArgumentGrammar>,
}

impl ToolSpec {
    /// Create a descriptor with conservative defaults
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {},
            }),
            output_schema: serde_json::json!({}),
            capabilities: CapabilitySet::new(),
            risk: RiskLevel::Low,
            time_budget_ms: 1_000,
            memory_budget_mb: 16,
            preconditions: Vec::new(),
            postconditions: Vec::new(),
            provides: Vec::new(),
            consumes: Vec::new(),
            grammar: None,
        }
    }

    /// Set input schema
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Set output schema
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    /// Add a capability
    pub fn with_capability(mut self, cap: Capability) -> Self {
        self.capabilities.add(cap);
        self
    }

    /// Set risk tier
    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    /// Set resource budgets
    pub fn with_budget(mut self, time_ms: u64, memory_mb: u64) -> Self {
        self.time_budget_ms = time_ms;
        self.memory_budget_mb = memory_mb;
        self
    }

    /// Add a precondition
    pub fn with_precondition(mut self, condition: Condition) -> Self {
        self.preconditions.push(condition);
        self
    }

    /// Add a postcondition
    pub fn with_postcondition(mut self, condition: Condition) -> Self {
        self.postconditions.push(condition);
        self
    }

    /// Declare a provided tag
    pub fn provides(mut self, tag: DataTag) -> Self {
        self.provides.push(tag);
        self
    }

    /// Declare a consumed tag
    pub fn consumes(mut self, tag: DataTag) -> Self {
        self.consumes.push(tag);
        self
    }

    /// Attach an argument grammar
    pub fn with_grammar(mut self, grammar: ArgumentGrammar) -> Self {
        self.grammar = Some(grammar);
        self
    }

    /// Fields the input schema marks as required
    pub fn required_fields(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|fields| fields.iter().filter_map(|f| f.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Core tool trait
///
/// Implement this trait to add a capability to the catalog. The policy and
/// safety layers run before `execute` is ever reached.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the descriptor
    fn spec(&self) -> &ToolSpec;

    /// Get tool name (convenience method)
    fn name(&self) -> &str {
        &self.spec().name
    }

    /// Custom idempotency key; `None` uses the canonical argument hash
    fn idempotency_key(&self, _args: &Value) -> Option<String> {
        None
    }

    /// Validate input arguments before execution
    ///
    /// The default checks the schema's `required` list and the declared
    /// `type` of string/number/boolean properties.
    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        let spec = self.spec();
        for field in spec.required_fields() {
            match args.get(field) {
                None | Some(Value::Null) => {
                    return Err(ToolError::validation(format!(
                        "Validation failed: '{}' is required by {}",
                        field, spec.name
                    )));
                }
                _ => {}
            }
        }
        if let Some(properties) = spec.input_schema.get("properties").and_then(|p| p.as_object()) {
            for (field, schema) in properties {
                let (Some(value), Some(expected)) =
                    (args.get(field), schema.get("type").and_then(|t| t.as_str()))
                else {
                    continue;
                };
                let ok = match expected {
                    "string" => value.is_string(),
                    "number" | "integer" => value.is_number(),
                    "boolean" => value.is_boolean(),
                    "array" => value.is_array(),
                    "object" => value.is_object(),
                    _ => true,
                };
                if !ok {
                    return Err(ToolError::validation(format!(
                        "Validation failed: '{}' must be of type {}",
                        field, expected
                    )));
                }
            }
        }
        Ok(())
    }

    /// Execute the tool with given arguments
    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<Value, ToolError>;
}

/// Handler trait for simple tools built from a descriptor and a function
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Handle a call
    async fn handle(&self, args: Value, ctx: &ExecutionContext) -> Result<Value, ToolError>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, ToolError>> + Send,
{
    async fn handle(&self, args: Value, _ctx: &ExecutionContext) -> Result<Value, ToolError> {
        (self)(args).await
    }
}

/// Tool assembled from a `ToolSpec` and a `ToolHandler`
pub struct HandlerTool<H> {
    spec: ToolSpec,
    handler: H,
}

impl<H: ToolHandler> HandlerTool<H> {
    /// Create a new handler tool
    pub fn new(spec: ToolSpec, handler: H) -> Self {
        Self { spec, handler }
    }
}

impl<H> std::fmt::Debug for HandlerTool<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTool")
            .field("name", &self.spec.name)
            .finish()
    }
}

#[async_trait]
impl<H: ToolHandler + 'static> Tool for HandlerTool<H> {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<Value, ToolError> {
        self.handler.handle(args, ctx).await
    }
}

/// Type alias for shared tools
pub type BoxedTool = Arc<dyn Tool>;
