//! Pattern gate rules
//!
//! A rule maps a case-insensitive regex to a tool. Any matching rule
//! pre-empts the classifier.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// One pattern rule
#[derive(Debug, Clone)]
pub struct PatternRule {
    /// Rule name, recorded in decisions
    pub name: String,
    /// Tool selected when the rule matches
    pub tool: String,
    /// Informational confidence (0.7 to 0.9 for the defaults)
    pub confidence: f32,
    regex: Regex,
}

impl PatternRule {
    /// Compile a rule
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        tool: impl Into<String>,
        confidence: f32,
    ) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self {
            name: name.into(),
            tool: tool.into(),
            confidence: confidence.clamp(0.0, 1.0),
            regex,
        })
    }

    /// Check if the rule matches `text`
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// The source pattern
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}

/// Serializable rule definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRuleConfig {
    pub name: String,
    pub pattern: String,
    pub tool: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    0.8
}

impl PatternRuleConfig {
    /// Compile into a rule
    pub fn compile(&self) -> Result<PatternRule, regex::Error> {
        PatternRule::new(&self.name, &self.pattern, &self.tool, self.confidence)
    }
}

/// Rules covering the built-in tools, in evaluation order
pub fn default_rules() -> Result<Vec<PatternRule>, regex::Error> {
    [
        (
            "read_file_verb",
            r"\b(?:read|open|view|cat|show)\s+(?:the\s+)?(?:contents\s+of\s+)?(?:file\s+)?\S+\.\w+",
            "read_file",
            0.9,
        ),
        (
            "list_dir_verb",
            r"\b(?:list|ls)\b|\bwhat\s+files\b",
            "list_dir",
            0.75,
        ),
        (
            "code_search_verb",
            r"\b(?:search|grep)\b|\b(?:find|look)\s+for\b",
            "code_search",
            0.85,
        ),
        (
            "write_file_verb",
            r"\b(?:write|save)\b.+\b(?:to|into)\s+\S+",
            "write_file",
            0.85,
        ),
        (
            "run_command_verb",
            r"\b(?:run|execute|exec)\b",
            "run_command",
            0.7,
        ),
    ]
    .into_iter()
    .map(|(name, pattern, tool, confidence)| PatternRule::new(name, pattern, tool, confidence))
    .collect()
}
