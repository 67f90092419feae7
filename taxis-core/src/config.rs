//! Configuration types for the orchestration engine

use crate::error::{Result, TaxisError};
use crate::observability::ObservabilityConfig;
use crate::policy::PolicyConfig;
use crate::router::RouterConfig;
use crate::safety::SafetyConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file, looked up in the working directory
pub const CONFIG_FILE: &str = "taxis.toml";

/// Environment variable naming an extra configuration file
pub const CONFIG_PATH_ENV: &str = "TAXIS_CONFIG_PATH";

/// Prefix of environment overrides; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "TAXIS_";

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxisConfig {
    /// Pattern rules and classifier weights
    pub router: RouterConfig,

    /// Per-tier and per-tool execution policies
    pub policy: PolicyConfig,

    /// Allowlists, global sandbox, quotas and idempotency TTL
    pub safety: SafetyConfig,

    /// Decision ledger settings
    pub observability: ObservabilityConfig,
}

impl TaxisConfig {
    /// Load configuration
    ///
    /// Loads in this order, later sources overriding earlier ones:
    /// 1. Defaults
    /// 2. `taxis.toml` in the working directory
    /// 3. The file named by `TAXIS_CONFIG_PATH`
    /// 4. `TAXIS_*` environment variables (e.g. `TAXIS_SAFETY__QUOTAS__MAX_CONCURRENCY=2`)
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is invalid.
    pub fn load() -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(TaxisConfig::default()))
            .merge(Toml::file(CONFIG_FILE));

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            figment = figment.merge(Toml::file(path));
        }

        let figment = figment.merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["config_path"])
                .split("__"),
        );

        Self::extract(figment, "Failed to load configuration")
    }

    /// Load configuration from a specific file, over the defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(TaxisConfig::default()))
            .merge(Toml::file(path.as_ref()));
        Self::extract(figment, "Failed to load configuration file")
    }

    /// Parse configuration from TOML text, over the defaults
    pub fn from_toml(text: &str) -> Result<Self> {
        let figment =
            Figment::from(Serialized::defaults(TaxisConfig::default())).merge(Toml::string(text));
        Self::extract(figment, "Failed to parse configuration")
    }

    fn extract(figment: Figment, context: &str) -> Result<Self> {
        let config: TaxisConfig = figment
            .extract()
            .map_err(|e| TaxisError::Configuration(format!("{}: {}", context, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the layers cannot run with
    ///
    /// # Errors
    ///
    /// Returns an error for zero quotas, zero ledger capacity or a zero
    /// candidate count.
    pub fn validate(&self) -> Result<()> {
        if !self.safety.quotas.is_valid() {
            return Err(TaxisError::Configuration(
                "safety.quotas: every quota must be greater than zero".to_string(),
            ));
        }
        if self.observability.max_records == 0 {
            return Err(TaxisError::Configuration(
                "observability.max_records must be greater than zero".to_string(),
            ));
        }
        if self.router.top_k == 0 {
            return Err(TaxisError::Configuration(
                "router.top_k must be greater than zero".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.router.min_score) {
            return Err(TaxisError::Configuration(format!(
                "router.min_score must be in [0, 1), got {}",
                self.router.min_score
            )));
        }
        let policies = self
            .policy
            .risk
            .iter()
            .map(|(risk, p)| (risk.as_str().to_string(), p))
            .chain(self.policy.tools.iter().map(|(tool, p)| (tool.clone(), p)));
        for (name, policy) in policies {
            if policy.timeout.is_some_and(|t| t.is_zero()) {
                return Err(TaxisError::Configuration(format!(
                    "policy for '{}' has a zero timeout",
                    name
                )));
            }
            if let Some(breaker) = &policy.circuit_breaker
                && breaker.failure_threshold == 0
            {
                return Err(TaxisError::Configuration(format!(
                    "policy for '{}' has a zero circuit breaker threshold",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ExecutionPolicy;
    use crate::tools::{RiskLevel, ToolSpec};
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        let config = TaxisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.router.top_k, 2);
        assert_eq!(config.observability.max_records, 1000);
    }

    #[test]
    fn test_from_toml_overrides_sections() {
        let config = TaxisConfig::from_toml(
            r#"
            [router]
            shadow_scoring = false

            [[router.rules]]
            name = "cat_verb"
            pattern = "\\bcat\\b"
            tool = "read_file"

            [safety]
            idempotency_ttl = "1m"

            [safety.quotas]
            max_concurrency = 2

            [policy.tools.run_command]
            timeout = "2s"
            retries = 0

            [observability]
            max_records = 50
            "#,
        )
        .unwrap();

        assert!(!config.router.shadow_scoring);
        assert_eq!(config.router.rules[0].confidence, 0.8);
        assert_eq!(config.safety.idempotency_ttl, Duration::from_secs(60));
        assert_eq!(config.safety.quotas.max_concurrency, 2);
        assert_eq!(config.safety.quotas.max_memory_mb, 1024);
        assert_eq!(
            config.policy.tools["run_command"].timeout,
            Some(Duration::from_secs(2))
        );
        assert_eq!(config.policy.tools["run_command"].retries, Some(0));
        assert_eq!(config.observability.max_records, 50);
    }

    #[test]
    fn test_risk_tier_override_keys() {
        let config = TaxisConfig::from_toml(
            r#"
            [policy.risk.high]
            timeout = "10s"
            require_approval = false
            "#,
        )
        .unwrap();
        let spec = ToolSpec::new("write_file", "").with_risk(RiskLevel::High);
        let policy = config.policy.policy_for(&spec);
        assert!(!policy.require_approval);
        assert_eq!(policy.timeout, Duration::from_secs(10));
        assert_eq!(policy.retries, 3);
        assert!(policy.circuit_breaker.is_some());
    }

    #[test]
    fn test_partial_override_keeps_critical_guards() {
        let config =
            TaxisConfig::from_toml("[policy.risk.critical]\nrequire_approval = false").unwrap();
        let spec = ToolSpec::new("run_command", "").with_risk(RiskLevel::Critical);
        let policy = config.policy.policy_for(&spec);

        let expected = ExecutionPolicy::for_risk(RiskLevel::Critical).with_approval(false);
        assert_eq!(policy, expected);
        assert!(policy.sandbox.is_some_and(|s| !s.network));
    }

    #[test]
    fn test_override_can_remove_guards() {
        let config = TaxisConfig::from_toml(
            r#"
            [policy.tools.run_command]
            sandbox_enabled = false
            circuit_breaker_enabled = false
            "#,
        )
        .unwrap();
        let spec = ToolSpec::new("run_command", "").with_risk(RiskLevel::Critical);
        let policy = config.policy.policy_for(&spec);
        assert!(policy.sandbox.is_none());
        assert!(policy.circuit_breaker.is_none());
        assert_eq!(policy.retries, 5);
        assert!(policy.require_approval);
    }

    #[test]
    fn test_zero_timeout_override_rejected() {
        let err = TaxisConfig::from_toml("[policy.risk.low]\ntimeout = \"0s\"").unwrap_err();
        assert!(matches!(err, TaxisError::Configuration(_)));
    }

    #[test]
    fn test_zero_quota_rejected() {
        let err = TaxisConfig::from_toml("[safety.quotas]\nmax_concurrency = 0").unwrap_err();
        assert!(matches!(err, TaxisError::Configuration(_)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = TaxisConfig::default();
        config.observability.max_records = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taxis.toml");
        std::fs::write(&path, "[router]\ntop_k = 3\n").unwrap();

        let config = TaxisConfig::from_file(&path).unwrap();
        assert_eq!(config.router.top_k, 3);
        assert!(config.router.default_rules);
    }
}
