//! Circuit Breaker Pattern
//!
//! Stops calling a tool that keeps failing. After `failure_threshold`
//! consecutive failures the breaker opens and rejects calls without invoking
//! the tool; once `recovery_timeout` has elapsed it admits up to
//! `half_open_max_calls` trial calls. A trial success closes it, a trial
//! failure reopens it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Circuit open - requests are rejected
    Open,
    /// Testing if the tool recovered
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time to wait before attempting recovery
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
    /// Trial calls admitted while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a sensitive config (opens quickly)
    pub fn sensitive() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(15),
            half_open_max_calls: 1,
        }
    }

    /// Create a tolerant config (takes more failures to open)
    pub fn tolerant() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }

    /// Builder: set failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Builder: set recovery timeout
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Builder: set half-open trial calls
    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls.max(1);
        self
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    half_open_calls: u32,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_calls: u32,
}

/// Circuit breaker for one (tool, policy) pairing
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new closed circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                opened_at: None,
                half_open_calls: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move open → half-open once the recovery timeout has elapsed
    fn check_state_transition(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.recovery_timeout)
        {
            tracing::info!(breaker = %self.name, "Circuit half-open");
            inner.state = CircuitState::HalfOpen;
            inner.half_open_calls = 0;
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        tracing::warn!(
            breaker = %self.name,
            failures = inner.failure_count,
            "Circuit opened"
        );
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.half_open_calls = 0;
    }

    fn close(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.half_open_calls = 0;
    }

    /// Breaker name (tool plus policy fingerprint)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.check_state_transition(&mut inner);
        inner.state
    }

    /// Ask to make a call; half-open admissions consume a trial slot
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        self.check_state_transition(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "Circuit closed");
                self.close(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                self.open(&mut inner);
            }
            CircuitState::HalfOpen => self.open(&mut inner),
            _ => {}
        }
    }

    /// Give back a half-open trial slot for a call that produced no verdict
    pub fn record_abandoned(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
        }
    }

    /// Get consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Time since the last recorded failure
    pub fn since_last_failure(&self) -> Option<Duration> {
        self.lock().last_failure.map(|at| at.elapsed())
    }

    /// Manually reset the circuit breaker
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.close(&mut inner);
    }

    /// Point-in-time view
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock();
        self.check_state_transition(&mut inner);
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_calls: inner.half_open_calls,
        }
    }
}

/// Breakers keyed by tool name and policy fingerprint
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Breaker for this pairing, created on first use
    pub fn get_or_create(
        &self,
        tool: &str,
        policy_fingerprint: &str,
        config: &CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let key = format!("{}#{}", tool, policy_fingerprint);
        Arc::clone(
            self.lock()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(key, config.clone()))),
        )
    }

    /// Snapshots of every breaker, sorted by name
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.lock().values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Close every breaker
    pub fn reset_all(&self) {
        for breaker in self.lock().values() {
            breaker.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
