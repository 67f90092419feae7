//! Allowlists for paths, hosts, commands and capabilities
//!
//! Patterns support a leading (`*.example.com`) or trailing (`/tmp/*`)
//! wildcard. An empty path/host/command list leaves that dimension
//! unrestricted; capabilities are deny-by-default.

use super::sandbox::normalize_path;
use crate::tools::{Capability, CapabilitySet};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Match `value` against a pattern with an optional leading/trailing `*`
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        (Some(_), Some(_)) if pattern.len() >= 2 => value.contains(&pattern[1..pattern.len() - 1]),
        (Some(suffix), _) => value.ends_with(suffix),
        (_, Some(prefix)) => value.starts_with(prefix),
        _ => pattern == value,
    }
}

/// Path containment: exact prefix by components, or wildcard text match
fn path_match(pattern: &str, path: &Path) -> bool {
    if pattern.contains('*') {
        return wildcard_match(pattern, &path.to_string_lossy());
    }
    path.starts_with(normalize_path(Path::new(pattern)))
}

/// Allowlist configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowlistConfig {
    /// Permitted path prefixes
    pub paths: Vec<String>,
    /// Permitted hosts
    pub hosts: Vec<String>,
    /// Permitted command names (first word of a command line)
    pub commands: Vec<String>,
    /// Permitted capabilities
    pub capabilities: CapabilitySet,
}

impl Default for AllowlistConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            hosts: Vec::new(),
            commands: Vec::new(),
            capabilities: CapabilitySet::from_capabilities([
                Capability::FilesystemRead,
                Capability::FilesystemWrite,
                Capability::Subprocess,
            ]),
        }
    }
}

impl AllowlistConfig {
    /// Allow every capability and leave every list unrestricted
    pub fn permissive() -> Self {
        Self {
            capabilities: CapabilitySet::all(),
            ..Self::default()
        }
    }

    /// Builder: add a path pattern
    pub fn with_path(mut self, pattern: impl Into<String>) -> Self {
        self.paths.push(pattern.into());
        self
    }

    /// Builder: add a host pattern
    pub fn with_host(mut self, pattern: impl Into<String>) -> Self {
        self.hosts.push(pattern.into());
        self
    }

    /// Builder: add a command pattern
    pub fn with_command(mut self, pattern: impl Into<String>) -> Self {
        self.commands.push(pattern.into());
        self
    }

    /// Builder: replace allowed capabilities
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Whether `path` (already normalized) is permitted
    pub fn permits_path(&self, path: &Path) -> bool {
        self.paths.is_empty() || self.paths.iter().any(|p| path_match(p, path))
    }

    /// Whether `host` is permitted
    pub fn permits_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.hosts.is_empty()
            || self
                .hosts
                .iter()
                .any(|p| wildcard_match(&p.to_ascii_lowercase(), &host))
    }

    /// Whether a command line is permitted, judged by its first word
    pub fn permits_command(&self, command_line: &str) -> bool {
        if self.commands.is_empty() {
            return true;
        }
        let name = command_line.split_whitespace().next().unwrap_or("");
        !name.is_empty() && self.commands.iter().any(|p| wildcard_match(p, name))
    }

    /// Capabilities in `required` that are not allowed
    pub fn missing_capabilities(&self, required: &CapabilitySet) -> CapabilitySet {
        self.capabilities.missing(required)
    }
}
