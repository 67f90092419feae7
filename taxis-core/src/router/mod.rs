//! Router: text to ranked tool candidates
//!
//! Two tiers. The pattern gate runs first: if any rule matches, every
//! matched tool is returned at score 1.0 and the classifier's opinion is
//! never used for selection. Otherwise the injected [`Classifier`] scores
//! each catalog tool and the top candidates are returned. Routing is
//! deterministic; ties are broken by tool name.

mod classifier;
mod pattern;

pub use classifier::{feature, Classifier, Features, LinearClassifier, ToolWeights};
pub use pattern::{default_rules, PatternRule, PatternRuleConfig};

use crate::error::{Result, TaxisError};
use crate::tools::ToolCatalog;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Why a candidate was proposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    Pattern,
    Classifier,
}

/// One ranked candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterCandidate {
    pub tool: String,
    /// Score in `[0, 1]`
    pub score: f32,
    pub reason: MatchReason,
}

/// Output of [`Router::route`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Ranked candidates
    pub candidates: Vec<RouterCandidate>,
    /// Names of the pattern rules that matched
    pub patterns_matched: Vec<String>,
    /// Classifier ranking computed alongside a pattern match
    pub shadow: Option<Vec<RouterCandidate>>,
}

impl RoutingDecision {
    /// Candidate tool names, best first
    pub fn tools(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.tool.as_str()).collect()
    }

    /// Whether the pattern gate decided
    pub fn is_pattern_match(&self) -> bool {
        !self.patterns_matched.is_empty()
    }

    /// The first `n` candidates
    pub fn top(&self, n: usize) -> &[RouterCandidate] {
        &self.candidates[..n.min(self.candidates.len())]
    }

    /// Top classifier pick: the shadow ranking after a pattern match,
    /// otherwise the classifier candidates themselves
    pub fn classifier_choice(&self) -> Option<&str> {
        match &self.shadow {
            Some(shadow) => shadow.first().map(|c| c.tool.as_str()),
            None if !self.is_pattern_match() => self.candidates.first().map(|c| c.tool.as_str()),
            None => None,
        }
    }
}

/// Router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Start from the built-in pattern rules
    pub default_rules: bool,
    /// Additional rules, evaluated after the defaults
    pub rules: Vec<PatternRuleConfig>,
    /// Classifier candidates returned
    pub top_k: usize,
    /// Classifier candidates must score above this
    pub min_score: f32,
    /// Compute the classifier ranking even when a pattern matches
    pub shadow_scoring: bool,
    /// Extra classifier weights merged over the built-in table
    pub weights: LinearClassifier,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_rules: true,
            rules: Vec::new(),
            top_k: 2,
            min_score: 0.0,
            shadow_scoring: true,
            weights: LinearClassifier::new(),
        }
    }
}

/// Builder for [`Router`]
pub struct RouterBuilder {
    rules: Vec<PatternRule>,
    classifier: Arc<dyn Classifier>,
    top_k: usize,
    min_score: f32,
    shadow_scoring: bool,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        let config = RouterConfig::default();
        Self {
            rules: Vec::new(),
            classifier: Arc::new(LinearClassifier::builtin()),
            top_k: config.top_k,
            min_score: config.min_score,
            shadow_scoring: config.shadow_scoring,
        }
    }
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the built-in rules
    pub fn default_rules(mut self) -> Result<Self> {
        let rules = default_rules()
            .map_err(|e| TaxisError::Configuration(format!("default pattern rules: {}", e)))?;
        self.rules.extend(rules);
        Ok(self)
    }

    /// Add a rule; an invalid regex is a configuration error
    pub fn rule(
        mut self,
        name: &str,
        pattern: &str,
        tool: &str,
        confidence: f32,
    ) -> Result<Self> {
        let rule = PatternRule::new(name, pattern, tool, confidence).map_err(|e| {
            TaxisError::Configuration(format!("invalid pattern for rule '{}': {}", name, e))
        })?;
        self.rules.push(rule);
        Ok(self)
    }

    /// Add a pre-compiled rule
    pub fn compiled_rule(mut self, rule: PatternRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Replace the classifier
    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Number of classifier candidates
    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = k.max(1);
        self
    }

    /// Minimum classifier score
    pub fn min_score(mut self, score: f32) -> Self {
        self.min_score = score;
        self
    }

    /// Enable shadow scoring
    pub fn shadow_scoring(mut self, enabled: bool) -> Self {
        self.shadow_scoring = enabled;
        self
    }

    pub fn build(self) -> Router {
        Router {
            rules: self.rules,
            classifier: self.classifier,
            top_k: self.top_k,
            min_score: self.min_score,
            shadow_scoring: self.shadow_scoring,
        }
    }
}

/// Two-tier router
pub struct Router {
    rules: Vec<PatternRule>,
    classifier: Arc<dyn Classifier>,
    top_k: usize,
    min_score: f32,
    shadow_scoring: bool,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("rules", &self.rules.iter().map(|r| &r.name).collect::<Vec<_>>())
            .field("classifier", &self.classifier.name())
            .field("top_k", &self.top_k)
            .field("shadow_scoring", &self.shadow_scoring)
            .finish()
    }
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Router with the built-in rules and classifier weights
    pub fn with_defaults() -> Result<Self> {
        Ok(RouterBuilder::new().default_rules()?.build())
    }

    /// Build from configuration
    pub fn from_config(config: &RouterConfig) -> Result<Self> {
        let mut builder = RouterBuilder::new()
            .top_k(config.top_k)
            .min_score(config.min_score)
            .shadow_scoring(config.shadow_scoring)
            .classifier(Arc::new(
                LinearClassifier::builtin().merged(config.weights.clone()),
            ));
        if config.default_rules {
            builder = builder.default_rules()?;
        }
        for rule in &config.rules {
            builder = builder.rule(&rule.name, &rule.pattern, &rule.tool, rule.confidence)?;
        }
        Ok(builder.build())
    }

    /// Pattern rules in evaluation order
    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// Route `text` over the tools in `catalog`
    pub async fn route(&self, text: &str, catalog: &ToolCatalog) -> RoutingDecision {
        let mut patterns_matched = Vec::new();
        let mut candidates: Vec<RouterCandidate> = Vec::new();

        for rule in self.rules.iter().filter(|r| r.is_match(text)) {
            if !catalog.contains(&rule.tool) {
                tracing::debug!(rule = %rule.name, tool = %rule.tool, "Rule targets unknown tool");
                continue;
            }
            patterns_matched.push(rule.name.clone());
            if !candidates.iter().any(|c| c.tool == rule.tool) {
                candidates.push(RouterCandidate {
                    tool: rule.tool.clone(),
                    score: 1.0,
                    reason: MatchReason::Pattern,
                });
            }
        }

        if !candidates.is_empty() {
            let shadow = if self.shadow_scoring {
                Some(self.classify(text, catalog).await)
            } else {
                None
            };
            tracing::debug!(
                tools = ?candidates.iter().map(|c| &c.tool).collect::<Vec<_>>(),
                rules = ?patterns_matched,
                "Pattern gate matched"
            );
            return RoutingDecision {
                candidates,
                patterns_matched,
                shadow,
            };
        }

        let candidates = self.classify(text, catalog).await;
        tracing::debug!(
            tools = ?candidates.iter().map(|c| &c.tool).collect::<Vec<_>>(),
            classifier = %self.classifier.name(),
            "Classifier fallback"
        );
        RoutingDecision {
            candidates,
            patterns_matched,
            shadow: None,
        }
    }

    async fn classify(&self, text: &str, catalog: &ToolCatalog) -> Vec<RouterCandidate> {
        let features = Features::extract(text);
        let mut scored = Vec::with_capacity(catalog.len());
        for name in catalog.names() {
            let raw = self.classifier.score(&features, name).await;
            let score = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };
            if score > self.min_score {
                scored.push(RouterCandidate {
                    tool: name.to_string(),
                    score,
                    reason: MatchReason::Classifier,
                });
            }
        }
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tool.cmp(&b.tool))
        });
        scored.truncate(self.top_k);
        scored
    }
}
