//! Pure folds over the decision ledger

use super::record::{DecisionRecord, Outcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Failure categories, checked in this order against the lowercased error
const FAILURE_CATEGORIES: &[(&str, &[&str])] = &[
    ("timeout", &["timeout", "timed out"]),
    ("quota", &["quota", "resource exceeded"]),
    (
        "permission",
        &["permission", "denied", "forbidden", "unauthorized", "approval", "not allowed"],
    ),
    ("validation", &["validation", "invalid", "missing argument", "is required"]),
    ("network", &["network", "connection", "host", "dns"]),
    ("circuit_breaker", &["circuit"]),
];

/// Category of a failure message; `other` when nothing matches
pub fn failure_category(error: &str) -> &'static str {
    let lower = error.to_lowercase();
    FAILURE_CATEGORIES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(category, _)| *category)
        .unwrap_or("other")
}

/// Correct/total tally for one tool
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolAccuracy {
    pub correct: u64,
    pub total: u64,
    pub accuracy: f64,
}

/// Router quality summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionReport {
    /// Decisions considered (replays excluded)
    pub total_decisions: u64,
    /// Decisions where the pattern gate decided
    pub pattern_decisions: u64,
    /// Pattern decisions that also carried a classifier opinion
    pub shadow_compared: u64,
    /// Shadow picks that were among the pattern candidates
    pub agreements: u64,
    pub agreement_rate: f64,
    pub per_tool: BTreeMap<String, ToolAccuracy>,
    /// Failure histogram keyed by category
    pub failure_categories: BTreeMap<String, u64>,
}

impl ConfusionReport {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a DecisionRecord>) -> Self {
        let mut report = Self::default();
        for record in records.into_iter().filter(|r| !r.replay) {
            report.total_decisions += 1;

            if !record.patterns_matched.is_empty() {
                report.pattern_decisions += 1;
                if let Some(shadow) = &record.shadow_choice {
                    report.shadow_compared += 1;
                    if record.router_candidates.iter().any(|c| &c.tool == shadow) {
                        report.agreements += 1;
                    }
                }
            }

            for tool in &record.chosen_tools {
                let entry = report.per_tool.entry(tool.clone()).or_default();
                entry.total += 1;
                if record.outcome == Outcome::Ok {
                    entry.correct += 1;
                }
            }

            if record.outcome == Outcome::Fail {
                let category = failure_category(record.error.as_deref().unwrap_or_default());
                *report
                    .failure_categories
                    .entry(category.to_string())
                    .or_default() += 1;
            }
        }

        report.agreement_rate = ratio(report.agreements, report.shadow_compared);
        for accuracy in report.per_tool.values_mut() {
            accuracy.accuracy = ratio(accuracy.correct, accuracy.total);
        }
        report
    }
}

/// Latency and outcome summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
    /// Decisions per second over the recorded window
    pub throughput_per_sec: f64,
}

impl PerformanceReport {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a DecisionRecord>) -> Self {
        let records: Vec<&DecisionRecord> = records.into_iter().collect();
        if records.is_empty() {
            return Self::default();
        }

        let total = records.len() as u64;
        let successes = records.iter().filter(|r| r.outcome.is_ok()).count() as u64;
        let failures = total - successes;

        let mut latencies: Vec<u64> = records.iter().map(|r| r.latency_ms).collect();
        latencies.sort_unstable();
        let avg_latency_ms = latencies.iter().sum::<u64>() as f64 / latencies.len() as f64;
        let percentile = |p: f64| {
            let idx = (latencies.len() as f64 * p) as usize;
            latencies[idx.min(latencies.len() - 1)]
        };

        let first = records.iter().map(|r| r.timestamp).min();
        let last = records.iter().map(|r| r.timestamp).max();
        let window_secs = match (first, last) {
            (Some(first), Some(last)) => {
                ((last - first).num_milliseconds() as f64 / 1000.0).max(1.0)
            }
            _ => 1.0,
        };

        Self {
            total,
            successes,
            failures,
            success_rate: ratio(successes, total),
            error_rate: ratio(failures, total),
            avg_latency_ms,
            p95_latency_ms: percentile(0.95),
            p99_latency_ms: percentile(0.99),
            throughput_per_sec: total as f64 / window_secs,
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
