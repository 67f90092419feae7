//! Replay results and statistics

use super::record::{DecisionRecord, Outcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of replaying one decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayContext {
    /// Id of the new record
    pub replay_id: String,
    /// Id of the replayed record
    pub original_id: String,
    pub original_outcome: Outcome,
    pub outcome: Outcome,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl ReplayContext {
    pub fn outcome_changed(&self) -> bool {
        self.outcome != self.original_outcome
    }
}

/// Aggregate over replay records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayStats {
    pub total_replays: u64,
    /// Replays whose outcome matched the original
    pub unchanged: u64,
    /// Original failed, replay succeeded
    pub fixed: u64,
    /// Original succeeded, replay failed
    pub regressed: u64,
}

impl ReplayStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a DecisionRecord>) -> Self {
        let mut stats = Self::default();
        for record in records.into_iter().filter(|r| r.replay) {
            stats.total_replays += 1;
            match (record.original_outcome, record.outcome) {
                (Some(Outcome::Fail), Outcome::Ok) => stats.fixed += 1,
                (Some(Outcome::Ok), Outcome::Fail) => stats.regressed += 1,
                _ => stats.unchanged += 1,
            }
        }
        stats
    }
}
