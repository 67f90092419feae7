//! Built-in filesystem and process tools
//!
//! Every built-in reports its output under a field named after the
//! [`DataTag`] it provides, which is the value the orchestrator stores in
//! the working state.

use super::capability::Capability;
use super::catalog::CatalogError;
use super::result::{ToolError, ToolErrorKind};
use super::tool::{ArgumentGrammar, BoxedTool, Condition, RiskLevel, Tool, ToolSpec};
use crate::context::ExecutionContext;
use crate::state::DataTag;
use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;

/// Files larger than this are skipped by `code_search`
const MAX_SEARCH_FILE_BYTES: u64 = 1024 * 1024;

/// Upper bound on matches returned by `code_search`
const MAX_SEARCH_RESULTS: usize = 200;

/// Directories `code_search` never descends into
const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];

/// Create every built-in tool
pub fn all() -> Result<Vec<BoxedTool>, CatalogError> {
    Ok(vec![
        Arc::new(ReadFileTool::new()?),
        Arc::new(ListDirTool::new()?),
        Arc::new(CodeSearchTool::new()?),
        Arc::new(WriteFileTool::new()?),
        Arc::new(RunCommandTool::new()?),
    ])
}

fn grammar(tool: &str, pattern: &str) -> Result<ArgumentGrammar, CatalogError> {
    ArgumentGrammar::new(pattern).map_err(|e| CatalogError::InvalidGrammar {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

fn str_arg<'a>(args: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    args.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::validation(format!("Validation failed: missing '{}'", field)))
}

/// Read a UTF-8 file
#[derive(Debug)]
pub struct ReadFileTool {
    spec: ToolSpec,
}

impl ReadFileTool {
    pub fn new() -> Result<Self, CatalogError> {
        let spec = ToolSpec::new("read_file", "Read the contents of a text file")
            .with_input_schema(json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }))
            .with_output_schema(json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "file_content": { "type": "string" },
                    "bytes": { "type": "integer" }
                }
            }))
            .with_capability(Capability::FilesystemRead)
            .with_risk(RiskLevel::Low)
            .with_budget(1_000, 32)
            .with_precondition(Condition::ArgPresent { field: "path".into() })
            .with_postcondition(Condition::OutputField { field: "file_content".into() })
            .provides(DataTag::FileContent)
            .with_grammar(grammar(
                "read_file",
                r"\b(?:read|open|show|view|cat)\s+(?:the\s+)?(?:contents\s+of\s+)?(?:file\s+)?(?P<path>\S+)",
            )?);
        Ok(Self { spec })
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<Value, ToolError> {
        let path = str_arg(&args, "path")?;
        let resolved = ctx.resolve_path(path);
        let content = tokio::fs::read_to_string(&resolved).await?;
        Ok(json!({
            "path": path,
            "bytes": content.len(),
            "file_content": content,
        }))
    }
}

/// List the entries of a directory
#[derive(Debug)]
pub struct ListDirTool {
    spec: ToolSpec,
}

impl ListDirTool {
    pub fn new() -> Result<Self, CatalogError> {
        let spec = ToolSpec::new("list_dir", "List the entries of a directory")
            .with_input_schema(json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }))
            .with_capability(Capability::FilesystemRead)
            .with_risk(RiskLevel::Low)
            .with_budget(500, 8)
            .with_postcondition(Condition::OutputField {
                field: "directory_listing".into(),
            })
            .provides(DataTag::DirectoryListing)
            .with_grammar(
                grammar(
                    "list_dir",
                    r"\b(?:list|ls)\b(?:\s+(?:the\s+)?(?:files|entries|contents)?\s*(?:in|of)?\s*(?:the\s+)?(?:directory\s+|dir\s+|folder\s+)?(?P<path>[\w./~-]+))?",
                )?
                .with_default("path", json!(".")),
            );
        Ok(Self { spec })
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<Value, ToolError> {
        let path = str_arg(&args, "path")?;
        let resolved = ctx.resolve_path(path);
        let mut reader = tokio::fs::read_dir(&resolved).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().to_string();
            entries.push(if is_dir { format!("{}/", name) } else { name });
        }
        entries.sort();
        Ok(json!({
            "path": path,
            "directory_listing": entries,
        }))
    }
}

/// Search file contents under a directory tree
#[derive(Debug)]
pub struct CodeSearchTool {
    spec: ToolSpec,
}

impl CodeSearchTool {
    pub fn new() -> Result<Self, CatalogError> {
        let spec = ToolSpec::new(
            "code_search",
            "Search files under a directory for a pattern (case-insensitive)",
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string" },
                "regex": { "type": "boolean" }
            },
            "required": ["pattern"]
        }))
        .with_capability(Capability::FilesystemRead)
        .with_risk(RiskLevel::Low)
        .with_budget(3_000, 64)
        .with_precondition(Condition::ArgPresent { field: "pattern".into() })
        .with_postcondition(Condition::OutputField { field: "search_results".into() })
        .provides(DataTag::SearchResults)
        .with_grammar(
            grammar(
                "code_search",
                r"\b(?:search|grep|find|look)\s+(?:for\s+)?(?P<pattern>.+?)(?:\s+(?:in|under)\s+(?P<path>[\w./~-]+))?\s*$",
            )?
            .with_default("path", json!(".")),
        );
        Ok(Self { spec })
    }

    fn search(root: &Path, regex: &regex::Regex) -> Vec<Value> {
        let mut matches = Vec::new();
        for entry in walkdir::WalkDir::new(root)
            .max_depth(16)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0 || !(name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()))
            })
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry
                .metadata()
                .map(|m| m.len() > MAX_SEARCH_FILE_BYTES)
                .unwrap_or(true)
            {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            for (line_num, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(json!({
                        "file": entry.path().display().to_string(),
                        "line": line_num + 1,
                        "text": line.trim(),
                    }));
                    if matches.len() >= MAX_SEARCH_RESULTS {
                        return matches;
                    }
                }
            }
        }
        matches
    }
}

#[async_trait]
impl Tool for CodeSearchTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<Value, ToolError> {
        let pattern = str_arg(&args, "pattern")?.to_string();
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let use_regex = args.get("regex").and_then(|v| v.as_bool()).unwrap_or(false);

        let source = if use_regex {
            pattern.clone()
        } else {
            regex::escape(&pattern)
        };
        let regex = RegexBuilder::new(&source)
            .case_insensitive(true)
            .build()
            .map_err(|e| ToolError::validation(format!("Validation failed: bad pattern: {}", e)))?;

        let root = ctx.resolve_path(path);
        if !root.exists() {
            return Err(ToolError::new(
                ToolErrorKind::NotFound,
                format!("Search root '{}' does not exist", root.display()),
            ));
        }

        let matches = tokio::task::spawn_blocking(move || Self::search(&root, &regex))
            .await
            .map_err(|e| ToolError::internal(format!("Search task failed: {}", e)))?;

        Ok(json!({
            "pattern": pattern,
            "path": path,
            "count": matches.len(),
            "search_results": matches,
        }))
    }
}

/// Write a UTF-8 file, creating parent directories
#[derive(Debug)]
pub struct WriteFileTool {
    spec: ToolSpec,
}

impl WriteFileTool {
    pub fn new() -> Result<Self, CatalogError> {
        let spec = ToolSpec::new("write_file", "Write text to a file, replacing its contents")
            .with_input_schema(json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }))
            .with_capability(Capability::FilesystemWrite)
            .with_risk(RiskLevel::High)
            .with_budget(1_000, 32)
            .with_precondition(Condition::ArgPresent { field: "path".into() })
            .with_postcondition(Condition::OutputField { field: "file_written".into() })
            .provides(DataTag::FileWritten)
            .with_grammar(grammar(
                "write_file",
                r"\b(?:write|save|put)\s+(?P<content>.+?)\s+(?:to|into)\s+(?:the\s+)?(?:file\s+)?(?P<path>\S+)",
            )?);
        Ok(Self { spec })
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<Value, ToolError> {
        let path = str_arg(&args, "path")?;
        let content = str_arg(&args, "content")?;
        let resolved = ctx.resolve_path(path);
        if let Some(parent) = resolved.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, content).await?;
        Ok(json!({
            "file_written": path,
            "bytes": content.len(),
        }))
    }
}

/// Run a shell command
#[derive(Debug)]
pub struct RunCommandTool {
    spec: ToolSpec,
}

impl RunCommandTool {
    pub fn new() -> Result<Self, CatalogError> {
        let spec = ToolSpec::new("run_command", "Run a shell command and capture its output")
            .with_input_schema(json!({
                "type": "object",
                "properties": { "command": { "type": "string" } },
                "required": ["command"]
            }))
            .with_capability(Capability::Subprocess)
            .with_risk(RiskLevel::Critical)
            .with_budget(10_000, 128)
            .with_precondition(Condition::ArgPresent { field: "command".into() })
            .with_postcondition(Condition::OutputField { field: "command_output".into() })
            .provides(DataTag::CommandOutput)
            .with_grammar(grammar(
                "run_command",
                r"\b(?:run|execute|exec)\s+(?:the\s+)?(?:command\s+)?(?P<command>.+)$",
            )?);
        Ok(Self { spec })
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<Value, ToolError> {
        let command = str_arg(&args, "command")?.trim();
        if command.is_empty() {
            return Err(ToolError::validation("Validation failed: empty command"));
        }

        tracing::info!(command = %command, "Running command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.kill_on_drop(true);
        if let Some(dir) = &ctx.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(ToolError::internal(format!(
                "Command exited with {}",
                output.status
            ))
            .with_context(json!({ "stdout": stdout, "stderr": stderr })));
        }

        Ok(json!({
            "command": command,
            "exit_code": output.status.code(),
            "command_output": stdout,
            "stderr": stderr,
        }))
    }
}
