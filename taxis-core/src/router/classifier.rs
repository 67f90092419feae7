//! Fallback classifier
//!
//! Text is reduced to a bag of [`Features`]; a [`Classifier`] turns those
//! into a raw score per tool. The default [`LinearClassifier`] is a static
//! weight table: `bias + Σ weight · feature`.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Feature set for one input text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    /// Lowercased unigrams and bigrams (`"read"`, `"read file"`)
    pub ngrams: BTreeSet<String>,
    pub has_quotes: bool,
    pub has_file_extension: bool,
    pub has_url: bool,
    pub word_count: usize,
    pub has_question_mark: bool,
}

/// Names of the non-ngram features
pub mod feature {
    pub const QUOTES: &str = "@quotes";
    pub const FILE_EXTENSION: &str = "@file_ext";
    pub const URL: &str = "@url";
    pub const QUESTION: &str = "@question";
    /// Word count, scaled to `[0, 1]` over 20 words
    pub const WORDS: &str = "@words";
}

static WORD_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[a-z0-9_]+").ok());
static FILE_EXT_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\b[\w-]+\.[a-z][a-z0-9]{0,5}\b").ok());
static URL_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\b(?:https?|ftp)://\S+").ok());

impl Features {
    /// Extract features from `text`
    pub fn extract(text: &str) -> Self {
        let lower = text.to_lowercase();
        let has_url = URL_RE.as_ref().is_some_and(|re| re.is_match(&lower));
        let without_urls = match URL_RE.as_ref() {
            Some(re) => re.replace_all(&lower, " ").to_string(),
            None => lower.clone(),
        };

        let words: Vec<&str> = WORD_RE
            .as_ref()
            .map(|re| re.find_iter(&lower).map(|m| m.as_str()).collect())
            .unwrap_or_default();

        let mut ngrams: BTreeSet<String> = words.iter().map(|w| w.to_string()).collect();
        for pair in words.windows(2) {
            ngrams.insert(format!("{} {}", pair[0], pair[1]));
        }

        Self {
            ngrams,
            has_quotes: text.contains(['"', '\'', '`']),
            has_file_extension: FILE_EXT_RE
                .as_ref()
                .is_some_and(|re| re.is_match(&without_urls)),
            has_url,
            word_count: words.len(),
            has_question_mark: text.contains('?'),
        }
    }

    /// Value of a named feature (0.0 when absent)
    pub fn value(&self, name: &str) -> f32 {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        match name {
            feature::QUOTES => flag(self.has_quotes),
            feature::FILE_EXTENSION => flag(self.has_file_extension),
            feature::URL => flag(self.has_url),
            feature::QUESTION => flag(self.has_question_mark),
            feature::WORDS => (self.word_count.min(20) as f32) / 20.0,
            ngram => flag(self.ngrams.contains(ngram)),
        }
    }
}

/// Scores tools from features
///
/// Implementations must be deterministic; the router clamps and ranks the
/// scores.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Raw score of `tool` for these features
    async fn score(&self, features: &Features, tool: &str) -> f32;

    /// Classifier name, for logs
    fn name(&self) -> &str {
        "classifier"
    }
}

/// Weights for one tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolWeights {
    #[serde(default)]
    pub bias: f32,
    #[serde(default)]
    pub features: BTreeMap<String, f32>,
}

/// Static linear weight table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinearClassifier {
    weights: HashMap<String, ToolWeights>,
}

impl LinearClassifier {
    /// Empty table (every tool scores 0)
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set weights for a tool
    pub fn with_weights(mut self, tool: impl Into<String>, bias: f32, features: &[(&str, f32)]) -> Self {
        self.weights.insert(
            tool.into(),
            ToolWeights {
                bias,
                features: features.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            },
        );
        self
    }

    /// Merge another table over this one, tool by tool
    pub fn merged(mut self, other: LinearClassifier) -> Self {
        self.weights.extend(other.weights);
        self
    }

    /// Weights covering the built-in tools
    pub fn builtin() -> Self {
        Self::new()
            .with_weights(
                "read_file",
                0.05,
                &[
                    ("read", 0.45),
                    ("open", 0.4),
                    ("show", 0.25),
                    ("view", 0.3),
                    ("contents", 0.3),
                    ("file", 0.15),
                    ("is in", 0.1),
                    (feature::FILE_EXTENSION, 0.3),
                    (feature::URL, -0.3),
                ],
            )
            .with_weights(
                "list_dir",
                0.05,
                &[
                    ("list", 0.45),
                    ("directory", 0.4),
                    ("folder", 0.4),
                    ("files", 0.2),
                    ("what files", 0.3),
                    ("ls", 0.45),
                    (feature::FILE_EXTENSION, -0.2),
                ],
            )
            .with_weights(
                "code_search",
                0.05,
                &[
                    ("search", 0.45),
                    ("find", 0.35),
                    ("grep", 0.5),
                    ("where", 0.3),
                    ("look for", 0.4),
                    ("usages", 0.3),
                    ("defined", 0.25),
                    (feature::QUOTES, 0.15),
                    (feature::QUESTION, 0.1),
                ],
            )
            .with_weights(
                "write_file",
                0.0,
                &[
                    ("write", 0.45),
                    ("save", 0.4),
                    ("create", 0.25),
                    ("to file", 0.2),
                    (feature::FILE_EXTENSION, 0.1),
                    (feature::QUESTION, -0.2),
                ],
            )
            .with_weights(
                "run_command",
                0.0,
                &[
                    ("run", 0.45),
                    ("execute", 0.45),
                    ("command", 0.3),
                    ("tests", 0.15),
                    ("build", 0.15),
                    (feature::QUESTION, -0.2),
                ],
            )
    }

    /// Deterministic synchronous score
    pub fn linear_score(&self, features: &Features, tool: &str) -> f32 {
        let Some(weights) = self.weights.get(tool) else {
            return 0.0;
        };
        weights.bias
            + weights
                .features
                .iter()
                .map(|(name, w)| w * features.value(name))
                .sum::<f32>()
    }

    /// Tools with weights
    pub fn tools(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(|s| s.as_str())
    }
}

#[async_trait]
impl Classifier for LinearClassifier {
    async fn score(&self, features: &Features, tool: &str) -> f32 {
        self.linear_score(features, tool)
    }

    fn name(&self) -> &str {
        "linear"
    }
}
