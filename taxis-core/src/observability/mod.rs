//! Observability: decision ledger, analysis and replay
//!
//! Every turn appends a [`DecisionRecord`]. Reports are computed on demand
//! from the ledger; nothing is persisted, but the ledger can be exported as
//! JSON lines for the embedding application.

mod analysis;
mod record;
mod replay;

pub use analysis::{failure_category, ConfusionReport, PerformanceReport, ToolAccuracy};
pub use record::{DecisionLedger, DecisionParams, DecisionRecord, Outcome};
pub use replay::{ReplayContext, ReplayStats};

use crate::error::{Result, TaxisError};
use crate::tools::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::io::Write;
use std::time::Instant;
use tokio::sync::RwLock;

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Ledger capacity
    pub max_records: usize,
    /// Records included in a report
    pub recent_decisions: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            max_records: 1000,
            recent_decisions: 10,
        }
    }
}

/// Snapshot returned by [`ObservabilityLayer::report`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityReport {
    pub confusion: ConfusionReport,
    pub performance: PerformanceReport,
    /// Newest first
    pub recent_decisions: Vec<DecisionRecord>,
    pub replay_stats: ReplayStats,
}

/// Owns the decision ledger
#[derive(Debug)]
pub struct ObservabilityLayer {
    ledger: RwLock<DecisionLedger>,
    config: ObservabilityConfig,
}

impl Default for ObservabilityLayer {
    fn default() -> Self {
        Self::new(ObservabilityConfig::default())
    }
}

impl ObservabilityLayer {
    pub fn new(config: ObservabilityConfig) -> Self {
        Self {
            ledger: RwLock::new(DecisionLedger::new(config.max_records)),
            config,
        }
    }

    pub fn config(&self) -> &ObservabilityConfig {
        &self.config
    }

    /// Append a decision, returning its id
    pub async fn record_decision(&self, params: DecisionParams) -> String {
        let record = params.into_record();
        tracing::info!(
            decision_id = %record.id,
            outcome = %record.outcome,
            tools = ?record.chosen_tools,
            latency_ms = record.latency_ms,
            replay = record.replay,
            "Recorded decision"
        );
        self.ledger.write().await.push(record)
    }

    pub async fn get(&self, id: &str) -> Option<DecisionRecord> {
        self.ledger.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.ledger.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ledger.read().await.is_empty()
    }

    /// Confusion, performance and replay summaries plus recent decisions
    pub async fn report(&self) -> ObservabilityReport {
        let ledger = self.ledger.read().await;
        ObservabilityReport {
            confusion: ConfusionReport::from_records(ledger.records()),
            performance: PerformanceReport::from_records(ledger.records()),
            recent_decisions: ledger.recent(self.config.recent_decisions),
            replay_stats: ReplayStats::from_records(ledger.records()),
        }
    }

    /// Re-run a recorded decision through `execute`
    ///
    /// A new record flagged as a replay is appended; the original is left
    /// untouched.
    pub async fn replay<F, Fut>(&self, id: &str, execute: F) -> Result<ReplayContext>
    where
        F: FnOnce(DecisionRecord) -> Fut,
        Fut: Future<Output = std::result::Result<Value, ToolError>>,
    {
        let original = self
            .get(id)
            .await
            .ok_or_else(|| TaxisError::DecisionNotFound(id.to_string()))?;

        tracing::debug!(decision_id = %id, input = %original.input, "Replaying decision");
        let started = Instant::now();
        let result = execute(original.clone()).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut params = DecisionParams::new(original.input.clone())
            .replaying(&original)
            .with_latency_ms(latency_ms);
        let (output, error) = match result {
            Ok(output) => (Some(output), None),
            Err(e) => {
                params = params.failed(e.to_string());
                (None, Some(e.to_string()))
            }
        };
        let outcome = if error.is_none() { Outcome::Ok } else { Outcome::Fail };
        let replay_id = self.record_decision(params).await;

        Ok(ReplayContext {
            replay_id,
            original_id: original.id,
            original_outcome: original.outcome,
            outcome,
            output,
            error,
            latency_ms,
        })
    }

    /// Write the ledger as JSON lines
    pub async fn export_jsonl<W: Write>(&self, writer: W) -> std::io::Result<usize> {
        self.ledger.read().await.export_jsonl(writer)
    }
}
