//! Resource quotas
//!
//! Usage counters are owned by a [`QuotaManager`] and only change under its
//! lock: a reservation checks every resource and increments them together,
//! or fails without touching anything. Releasing is tied to the
//! [`QuotaReservation`] guard, so every exit path gives units back.

use crate::tools::{Capability, ToolSpec};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Configured resource ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceQuotas {
    /// Concurrent tool executions
    pub max_concurrency: u64,
    /// Memory reserved by running tools
    pub max_memory_mb: u64,
    /// CPU time reserved by running tools
    pub max_cpu_time_ms: u64,
    /// Network requests in flight
    pub max_network_requests: u64,
}

impl Default for ResourceQuotas {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_memory_mb: 1024,
            max_cpu_time_ms: 120_000,
            max_network_requests: 32,
        }
    }
}

impl ResourceQuotas {
    /// Whether every ceiling is non-zero
    pub fn is_valid(&self) -> bool {
        self.max_concurrency > 0
            && self.max_memory_mb > 0
            && self.max_cpu_time_ms > 0
            && self.max_network_requests > 0
    }
}

/// Amounts currently reserved, or requested by one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub concurrency: u64,
    pub memory_mb: u64,
    pub cpu_time_ms: u64,
    pub network_requests: u64,
}

/// What a single tool call asks for
pub type ResourceRequest = ResourceUsage;

impl ResourceUsage {
    /// Request for one execution of `spec`
    pub fn for_tool(spec: &ToolSpec) -> Self {
        Self {
            concurrency: 1,
            memory_mb: spec.memory_budget_mb,
            cpu_time_ms: spec.time_budget_ms,
            network_requests: u64::from(spec.capabilities.contains(Capability::Network)),
        }
    }
}

/// A quota-tracked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Concurrency,
    Memory,
    CpuTime,
    NetworkRequests,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Resource::Concurrency => "concurrency",
            Resource::Memory => "memory_mb",
            Resource::CpuTime => "cpu_time_ms",
            Resource::NetworkRequests => "network_requests",
        };
        write!(f, "{}", name)
    }
}

/// A reservation would exceed a ceiling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("quota exceeded for {resource}: requested {requested}, in use {in_use}, limit {limit}")]
pub struct QuotaExceeded {
    pub resource: Resource,
    pub requested: u64,
    pub in_use: u64,
    pub limit: u64,
}

/// Shared quota counters
#[derive(Debug)]
pub struct QuotaManager {
    quotas: ResourceQuotas,
    usage: Mutex<ResourceUsage>,
}

impl QuotaManager {
    /// Create a manager with zero usage
    pub fn new(quotas: ResourceQuotas) -> Arc<Self> {
        Arc::new(Self {
            quotas,
            usage: Mutex::new(ResourceUsage::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ResourceUsage> {
        self.usage.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, usage: &ResourceUsage, request: &ResourceRequest) -> Result<(), QuotaExceeded> {
        let checks = [
            (Resource::Concurrency, request.concurrency, usage.concurrency, self.quotas.max_concurrency),
            (Resource::Memory, request.memory_mb, usage.memory_mb, self.quotas.max_memory_mb),
            (Resource::CpuTime, request.cpu_time_ms, usage.cpu_time_ms, self.quotas.max_cpu_time_ms),
            (
                Resource::NetworkRequests,
                request.network_requests,
                usage.network_requests,
                self.quotas.max_network_requests,
            ),
        ];
        for (resource, requested, in_use, limit) in checks {
            if in_use.saturating_add(requested) > limit {
                return Err(QuotaExceeded {
                    resource,
                    requested,
                    in_use,
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Check without reserving
    pub fn can_reserve(&self, request: &ResourceRequest) -> Result<(), QuotaExceeded> {
        let usage = self.lock();
        self.check(&usage, request)
    }

    /// Reserve `request`, or fail without mutating usage
    pub fn reserve(self: &Arc<Self>, request: ResourceRequest) -> Result<QuotaReservation, QuotaExceeded> {
        let mut usage = self.lock();
        self.check(&usage, &request)?;
        usage.concurrency += request.concurrency;
        usage.memory_mb += request.memory_mb;
        usage.cpu_time_ms += request.cpu_time_ms;
        usage.network_requests += request.network_requests;
        tracing::debug!(
            concurrency = usage.concurrency,
            memory_mb = usage.memory_mb,
            "Quota reserved"
        );
        Ok(QuotaReservation {
            manager: Arc::clone(self),
            request,
            released: false,
        })
    }

    /// Give back `request`, clamping each counter at zero
    pub fn release(&self, request: &ResourceRequest) {
        let mut usage = self.lock();
        usage.concurrency = usage.concurrency.saturating_sub(request.concurrency);
        usage.memory_mb = usage.memory_mb.saturating_sub(request.memory_mb);
        usage.cpu_time_ms = usage.cpu_time_ms.saturating_sub(request.cpu_time_ms);
        usage.network_requests = usage.network_requests.saturating_sub(request.network_requests);
    }

    /// Snapshot of current usage
    pub fn usage(&self) -> ResourceUsage {
        *self.lock()
    }

    /// Configured ceilings
    pub fn quotas(&self) -> ResourceQuotas {
        self.quotas
    }
}

/// Reserved units; released on drop
#[derive(Debug)]
#[must_use = "dropping a reservation releases it immediately"]
pub struct QuotaReservation {
    manager: Arc<QuotaManager>,
    request: ResourceRequest,
    released: bool,
}

impl QuotaReservation {
    /// What this reservation holds
    pub fn request(&self) -> &ResourceRequest {
        &self.request
    }

    /// Release now instead of at drop
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.manager.release(&self.request);
        }
    }
}

impl Drop for QuotaReservation {
    fn drop(&mut self) {
        self.release_inner();
    }
}
