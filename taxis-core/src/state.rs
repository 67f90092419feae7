//! Working state threaded through a conversation
//!
//! Tools exchange data through typed slots instead of a free-form bag:
//! every slot is named by a [`DataTag`], which is also what the planner uses
//! to infer step dependencies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Named piece of data a step provides or consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataTag {
    /// Contents of a file that was read
    FileContent,
    /// Path of a file that was written
    FileWritten,
    /// Matches produced by a code search
    SearchResults,
    /// Output of a command
    CommandOutput,
    /// Entries of a listed directory
    DirectoryListing,
}

impl DataTag {
    /// Get all defined tags
    pub fn all() -> &'static [DataTag] {
        &[
            DataTag::FileContent,
            DataTag::FileWritten,
            DataTag::SearchResults,
            DataTag::CommandOutput,
            DataTag::DirectoryListing,
        ]
    }

    /// Get the string name of this tag
    pub fn as_str(&self) -> &'static str {
        match self {
            DataTag::FileContent => "file_content",
            DataTag::FileWritten => "file_written",
            DataTag::SearchResults => "search_results",
            DataTag::CommandOutput => "command_output",
            DataTag::DirectoryListing => "directory_listing",
        }
    }

    /// Tags whose name appears in `text`
    pub fn referenced_in(text: &str) -> impl Iterator<Item = DataTag> + '_ {
        DataTag::all()
            .iter()
            .copied()
            .filter(move |tag| text.contains(tag.as_str()))
    }
}

impl std::fmt::Display for DataTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DataTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataTag::all()
            .iter()
            .copied()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| format!("Unknown data tag: {}", s))
    }
}

/// Steps kept in [`WorkingState::history`]; older entries are dropped first
pub const MAX_HISTORY: usize = 256;

/// One executed step, kept for auditing inside the state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEntry {
    /// Turn the step ran in
    pub turn: u64,
    /// Tool name
    pub tool: String,
    /// Whether it succeeded
    pub success: bool,
}

/// State carried from turn to turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingState {
    /// Data slots filled by tools
    data: BTreeMap<DataTag, Value>,

    /// Number of completed turns
    pub turn: u64,

    /// Most recent executed steps, oldest first, at most [`MAX_HISTORY`]
    pub history: Vec<StepEntry>,
}

impl WorkingState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: pre-fill a slot
    pub fn with_data(mut self, tag: DataTag, value: Value) -> Self {
        self.data.insert(tag, value);
        self
    }

    /// Read a slot
    pub fn get(&self, tag: DataTag) -> Option<&Value> {
        self.data.get(&tag)
    }

    /// Fill a slot, returning the previous value
    pub fn set(&mut self, tag: DataTag, value: Value) -> Option<Value> {
        self.data.insert(tag, value)
    }

    /// Clear a slot
    pub fn remove(&mut self, tag: DataTag) -> Option<Value> {
        self.data.remove(&tag)
    }

    /// Check whether a slot holds data
    pub fn has(&self, tag: DataTag) -> bool {
        self.data.get(&tag).is_some_and(|v| !v.is_null())
    }

    /// Tags currently holding data
    pub fn available_tags(&self) -> BTreeSet<DataTag> {
        self.data
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(tag, _)| *tag)
            .collect()
    }

    /// Append a step to the history
    pub fn record_step(&mut self, tool: impl Into<String>, success: bool) {
        self.history.push(StepEntry {
            turn: self.turn,
            tool: tool.into(),
            success,
        });
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_round_trip_names() {
        for tag in DataTag::all() {
            let parsed: DataTag = tag.as_str().parse().unwrap();
            assert_eq!(parsed, *tag);
        }
        assert!("nope".parse::<DataTag>().is_err());
    }

    #[test]
    fn test_referenced_in() {
        let tags: Vec<_> = DataTag::referenced_in("copy file_content into search_results").collect();
        assert_eq!(tags, vec![DataTag::FileContent, DataTag::SearchResults]);
    }

    #[test]
    fn test_null_slots_are_not_available() {
        let mut state = WorkingState::new().with_data(DataTag::FileContent, json!("x"));
        state.set(DataTag::CommandOutput, Value::Null);

        assert!(state.has(DataTag::FileContent));
        assert!(!state.has(DataTag::CommandOutput));
        assert_eq!(
            state.available_tags().into_iter().collect::<Vec<_>>(),
            vec![DataTag::FileContent]
        );
    }

    #[test]
    fn test_history_uses_current_turn() {
        let mut state = WorkingState::new();
        state.turn = 3;
        state.record_step("read_file", true);
        assert_eq!(state.history[0].turn, 3);
        assert_eq!(state.history[0].tool, "read_file");
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = WorkingState::new();
        for turn in 0..(MAX_HISTORY as u64 + 10) {
            state.turn = turn;
            state.record_step("ping", true);
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].turn, 10);
        assert_eq!(state.history.last().unwrap().turn, MAX_HISTORY as u64 + 9);
    }
}
