//! Capabilities a tool declares it needs
//!
//! The safety layer checks declared capabilities against its allowlist
//! before a step may run; the policy layer's sandbox consults them to
//! refuse network access.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Capabilities that tools may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Read from filesystem
    FilesystemRead,

    /// Write to filesystem
    FilesystemWrite,

    /// Make network requests
    Network,

    /// Execute subprocesses
    Subprocess,

    /// Access secrets/credentials
    Secrets,
}

impl Capability {
    /// Get all defined capabilities
    pub fn all() -> &'static [Capability] {
        &[
            Capability::FilesystemRead,
            Capability::FilesystemWrite,
            Capability::Network,
            Capability::Subprocess,
            Capability::Secrets,
        ]
    }

    /// Capabilities that can change the world outside the process
    pub fn privileged() -> &'static [Capability] {
        &[
            Capability::FilesystemWrite,
            Capability::Network,
            Capability::Subprocess,
            Capability::Secrets,
        ]
    }

    /// Check if this capability is privileged
    pub fn is_privileged(&self) -> bool {
        Self::privileged().contains(self)
    }

    /// Get the string name of this capability
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::FilesystemRead => "filesystem_read",
            Capability::FilesystemWrite => "filesystem_write",
            Capability::Network => "network",
            Capability::Subprocess => "subprocess",
            Capability::Secrets => "secrets",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A set of capabilities
///
/// Ordered so that listings and violation messages are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    capabilities: BTreeSet<Capability>,
}

impl CapabilitySet {
    /// Create an empty capability set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a capability set with all capabilities
    pub fn all() -> Self {
        Capability::all().iter().copied().collect()
    }

    /// Create a capability set from an iterator of capabilities
    pub fn from_capabilities(iter: impl IntoIterator<Item = Capability>) -> Self {
        iter.into_iter().collect()
    }

    /// Add a capability
    pub fn add(&mut self, cap: Capability) -> &mut Self {
        self.capabilities.insert(cap);
        self
    }

    /// Remove a capability
    pub fn remove(&mut self, cap: Capability) -> &mut Self {
        self.capabilities.remove(&cap);
        self
    }

    /// Check if capability is present
    pub fn contains(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    /// Check if all capabilities in `required` are present
    pub fn contains_all(&self, required: &CapabilitySet) -> bool {
        required.capabilities.is_subset(&self.capabilities)
    }

    /// Capabilities in `required` that this set lacks
    pub fn missing(&self, required: &CapabilitySet) -> CapabilitySet {
        CapabilitySet {
            capabilities: required
                .capabilities
                .difference(&self.capabilities)
                .copied()
                .collect(),
        }
    }

    /// Check if any capability is privileged
    pub fn has_privileged(&self) -> bool {
        self.capabilities.iter().any(|c| c.is_privileged())
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Number of capabilities in the set
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Get iterator over capabilities
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self {
            capabilities: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.capabilities.iter().map(|c| c.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod capability_tests {
    use super::*;

    #[test]
    fn test_privileged_split() {
        assert!(!Capability::FilesystemRead.is_privileged());
        assert!(Capability::FilesystemWrite.is_privileged());
        assert!(Capability::Network.is_privileged());
        assert!(Capability::Subprocess.is_privileged());
    }

    #[test]
    fn test_capability_set_operations() {
        let mut set = CapabilitySet::new();
        assert!(set.is_empty());

        set.add(Capability::Network);
        assert!(set.contains(Capability::Network));
        assert!(!set.contains(Capability::Subprocess));
        assert!(set.has_privileged());

        set.remove(Capability::Network);
        assert!(!set.contains(Capability::Network));
    }

    #[test]
    fn test_missing_capabilities() {
        let have = CapabilitySet::from_capabilities([Capability::FilesystemRead]);
        let need = CapabilitySet::from_capabilities([
            Capability::FilesystemRead,
            Capability::Network,
            Capability::Subprocess,
        ]);

        let missing = have.missing(&need);
        assert_eq!(missing.len(), 2);
        assert!(missing.contains(Capability::Network));
        assert!(missing.contains(Capability::Subprocess));
        assert!(!have.contains_all(&need));
    }

    #[test]
    fn test_display_is_sorted() {
        let set = CapabilitySet::from_capabilities([Capability::Subprocess, Capability::FilesystemRead]);
        assert_eq!(set.to_string(), "[filesystem_read, subprocess]");
    }

    #[test]
    fn test_serde_names() {
        let set = CapabilitySet::from_capabilities([Capability::FilesystemWrite]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["filesystem_write"]"#);
    }
}
