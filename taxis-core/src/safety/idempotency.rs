//! Idempotency cache
//!
//! Successful results are cached under `tool name + SHA-256 of the
//! canonical JSON arguments` (or a tool-supplied key) for a fixed TTL.
//! Expired entries are evicted lazily: on lookup of the same key, and in
//! bulk whenever a new result is stored.

use crate::tools::Tool;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Default time-to-live for cached results
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(300);

/// Serialize with object keys sorted, independent of map ordering
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Default key: tool name plus the hash of the canonical arguments
pub fn cache_key(tool_name: &str, args: &Value) -> String {
    let digest = Sha256::digest(canonical_json(args).as_bytes());
    format!("{}:{:x}", tool_name, digest)
}

/// Key for a call, honoring the tool's own key function
pub fn key_for(tool: &dyn Tool, args: &Value) -> String {
    match tool.idempotency_key(args) {
        Some(key) => format!("{}:{}", tool.name(), key),
        None => cache_key(tool.name(), args),
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: Value,
    stored_at: Instant,
}

/// TTL cache of successful tool results
#[derive(Debug)]
pub struct IdempotencyCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(DEFAULT_IDEMPOTENCY_TTL)
    }
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Configured TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live cached result for `key`
    pub fn lookup(&self, key: &str) -> Option<Value> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.result.clone()),
            Some(_) => {
                entries.remove(key);
                tracing::debug!(key = %key, "Evicted expired idempotency entry");
                None
            }
            None => None,
        }
    }

    /// Cache a successful result
    pub fn store(&self, key: impl Into<String>, result: Value) {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired idempotency entries");
        }
        entries.insert(
            key.into(),
            CacheEntry {
                result,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Number of entries (live or not yet evicted)
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove everything
    pub fn clear(&self) {
        self.lock().clear();
    }
}
