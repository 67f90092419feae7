//! Decision records and the bounded ledger holding them

use crate::router::{RouterCandidate, RoutingDecision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::Write;
use uuid::Uuid;

/// Outcome of a recorded decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Fail,
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Ok => write!(f, "ok"),
            Outcome::Fail => write!(f, "fail"),
        }
    }
}

/// Audit entry for one routing, planning and execution outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Original instruction
    pub input: String,
    /// Pattern rules that matched
    pub patterns_matched: Vec<String>,
    /// Router candidates, best first
    pub router_candidates: Vec<RouterCandidate>,
    /// Classifier's top pick computed alongside a pattern match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_choice: Option<String>,
    /// Tools the plan executed (or would have)
    pub chosen_tools: Vec<String>,
    /// Arguments per chosen tool
    pub args: Vec<Value>,
    pub outcome: Outcome,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether this record was produced by a replay
    #[serde(default)]
    pub replay: bool,
    /// Id of the replayed record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_of: Option<String>,
    /// Outcome of the replayed record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_outcome: Option<Outcome>,
}

/// Input for [`DecisionLedger::record`]
#[derive(Debug, Clone)]
pub struct DecisionParams {
    input: String,
    patterns_matched: Vec<String>,
    router_candidates: Vec<RouterCandidate>,
    shadow_choice: Option<String>,
    chosen_tools: Vec<String>,
    args: Vec<Value>,
    outcome: Outcome,
    latency_ms: u64,
    error: Option<String>,
    replay_of: Option<(String, Outcome)>,
}

impl DecisionParams {
    /// Successful decision for `input`
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            patterns_matched: Vec::new(),
            router_candidates: Vec::new(),
            shadow_choice: None,
            chosen_tools: Vec::new(),
            args: Vec::new(),
            outcome: Outcome::Ok,
            latency_ms: 0,
            error: None,
            replay_of: None,
        }
    }

    /// Copy routing details
    pub fn with_routing(mut self, decision: &RoutingDecision) -> Self {
        self.patterns_matched = decision.patterns_matched.clone();
        self.router_candidates = decision.candidates.clone();
        self.shadow_choice = decision
            .shadow
            .as_ref()
            .and_then(|s| s.first())
            .map(|c| c.tool.clone());
        self
    }

    /// Add one executed (or planned) tool call
    pub fn with_call(mut self, tool: impl Into<String>, args: Value) -> Self {
        self.chosen_tools.push(tool.into());
        self.args.push(args);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Mark as failed with the causing message
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.outcome = Outcome::Fail;
        self.error = Some(error.into());
        self
    }

    /// Mark as a replay of `original`
    pub fn replaying(mut self, original: &DecisionRecord) -> Self {
        self.patterns_matched = original.patterns_matched.clone();
        self.router_candidates = original.router_candidates.clone();
        self.shadow_choice = original.shadow_choice.clone();
        self.chosen_tools = original.chosen_tools.clone();
        self.args = original.args.clone();
        self.replay_of = Some((original.id.clone(), original.outcome));
        self
    }

    pub(crate) fn into_record(self) -> DecisionRecord {
        let (replay_of, original_outcome) = match self.replay_of {
            Some((id, outcome)) => (Some(id), Some(outcome)),
            None => (None, None),
        };
        DecisionRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            input: self.input,
            patterns_matched: self.patterns_matched,
            router_candidates: self.router_candidates,
            shadow_choice: self.shadow_choice,
            chosen_tools: self.chosen_tools,
            args: self.args,
            outcome: self.outcome,
            latency_ms: self.latency_ms,
            error: self.error,
            replay: replay_of.is_some(),
            replay_of,
            original_outcome,
        }
    }
}

/// Append-only ring buffer of decisions
///
/// Beyond `capacity` the oldest record is evicted.
#[derive(Debug, Clone)]
pub struct DecisionLedger {
    records: VecDeque<DecisionRecord>,
    capacity: usize,
}

impl DecisionLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a record built from `params`, returning its id
    pub fn record(&mut self, params: DecisionParams) -> String {
        self.push(params.into_record())
    }

    /// Append a finished record
    pub fn push(&mut self, record: DecisionRecord) -> String {
        let id = record.id.clone();
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        id
    }

    pub fn get(&self, id: &str) -> Option<&DecisionRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Records, oldest first
    pub fn records(&self) -> impl Iterator<Item = &DecisionRecord> {
        self.records.iter()
    }

    /// The `n` most recent records, newest first
    pub fn recent(&self, n: usize) -> Vec<DecisionRecord> {
        self.records.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write one JSON object per line; returns the number of records written
    pub fn export_jsonl<W: Write>(&self, mut writer: W) -> std::io::Result<usize> {
        for record in &self.records {
            writeln!(writer, "{}", serde_json::to_string(record)?)?;
        }
        writer.flush()?;
        Ok(self.records.len())
    }
}
