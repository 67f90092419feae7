//! Sandbox path and host validation
//!
//! Paths are normalized lexically before any check, so `..` can never climb
//! out of the sandbox root. Blocked prefixes take precedence over allowed
//! ones.

use super::allowlist::wildcard_match;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Argument names treated as filesystem paths
pub const PATH_ARGS: &[&str] = &["path", "file", "dir", "directory", "source", "destination"];

/// Argument names treated as hosts or URLs
pub const HOST_ARGS: &[&str] = &["host", "url", "endpoint"];

/// Argument names treated as command lines
pub const COMMAND_ARGS: &[&str] = &["command", "cmd"];

/// Normalize a path without touching the filesystem
///
/// `.` components are dropped and `..` pops the previous component; a `..`
/// at the root stays at the root.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                ) && normalized.pop();
                if !popped && !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Host portion of a URL or bare host string
pub fn host_of(value: &str) -> &str {
    let without_scheme = value.split_once("://").map(|(_, rest)| rest).unwrap_or(value);
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_scheme);
    let authority = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    }
}

/// Sandbox configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Root every path must stay under (falls back to the context working dir)
    pub root: Option<PathBuf>,
    /// Extra permitted prefixes; empty means "anything under the root"
    pub allowed_paths: Vec<PathBuf>,
    /// Prefixes that are always rejected
    pub blocked_paths: Vec<PathBuf>,
    /// Permitted hosts when network is enabled; empty means any
    pub allowed_hosts: Vec<String>,
    /// Whether network access is permitted
    pub network: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: None,
            allowed_paths: Vec::new(),
            blocked_paths: ["/etc", "/proc", "/sys", "/dev", "/boot"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            allowed_hosts: Vec::new(),
            network: true,
        }
    }
}

impl SandboxConfig {
    /// Sandbox with network disabled
    pub fn offline() -> Self {
        Self {
            network: false,
            ..Self::default()
        }
    }

    /// Builder: set root
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Builder: add an allowed prefix
    pub fn allow_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.allowed_paths.push(path.into());
        self
    }

    /// Builder: add a blocked prefix
    pub fn block_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.blocked_paths.push(path.into());
        self
    }

    /// Builder: add an allowed host
    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.push(host.into());
        self
    }

    /// Builder: enable or disable network
    pub fn with_network(mut self, network: bool) -> Self {
        self.network = network;
        self
    }
}

/// Validates paths and hosts against a [`SandboxConfig`]
#[derive(Debug, Clone, Default)]
pub struct SandboxValidator {
    config: SandboxConfig,
}

impl SandboxValidator {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// The underlying configuration
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Root to validate against: the configured one, else `fallback`
    pub fn effective_root<'a>(&'a self, fallback: Option<&'a Path>) -> Option<&'a Path> {
        self.config.root.as_deref().or(fallback)
    }

    /// Validate a path, returning its normalized absolute form
    pub fn validate_path(&self, raw: &str, fallback_root: Option<&Path>) -> Result<PathBuf, String> {
        let root = self.effective_root(fallback_root).map(normalize_path);
        let candidate = Path::new(raw);
        let joined = match &root {
            Some(root) if candidate.is_relative() => root.join(candidate),
            _ => candidate.to_path_buf(),
        };
        let normalized = normalize_path(&joined);

        if let Some(blocked) = self
            .config
            .blocked_paths
            .iter()
            .find(|b| normalized.starts_with(normalize_path(b)))
        {
            return Err(format!(
                "path '{}' is under blocked prefix '{}'",
                raw,
                blocked.display()
            ));
        }

        if let Some(root) = &root
            && !normalized.starts_with(root)
        {
            return Err(format!(
                "path '{}' escapes sandbox root '{}'",
                raw,
                root.display()
            ));
        }

        if !self.config.allowed_paths.is_empty()
            && !self.config.allowed_paths.iter().any(|allowed| {
                let allowed = match &root {
                    Some(root) if allowed.is_relative() => root.join(allowed),
                    _ => allowed.clone(),
                };
                normalized.starts_with(normalize_path(&allowed))
            })
        {
            return Err(format!("path '{}' is not in an allowed location", raw));
        }

        Ok(normalized)
    }

    /// Validate a host or URL
    pub fn validate_host(&self, value: &str) -> Result<(), String> {
        if !self.config.network {
            return Err(format!("network access to '{}' is disabled", value));
        }
        let host = host_of(value).to_ascii_lowercase();
        if self.config.allowed_hosts.is_empty()
            || self
                .config
                .allowed_hosts
                .iter()
                .any(|p| wildcard_match(&p.to_ascii_lowercase(), &host))
        {
            Ok(())
        } else {
            Err(format!("host '{}' is not allowed", host))
        }
    }
}
