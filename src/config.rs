//! Pipeline configuration.
//!
//! A pipeline is described by a TOML document holding the transport defaults
//! and one flat key/value table per parameterized stage:
//!
//! ```toml
//! default_capacity = 4
//! poll_interval_ms = 25
//!
//! [retry]
//! max_attempts = 3
//! backoff_ms = 10
//!
//! [stages.sink]
//! login = "writer"
//! ip = "10.0.0.5"
//! ```

use crate::error::{PipelineError, Result};
use crate::strategy::{ConsumptionStrategy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default slot count for connections built by a pipeline
pub const DEFAULT_CAPACITY: usize = 1;

/// Default wake-up interval for `BoundedPoll` consumers
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Flat key/value parameter set for one stage
pub type StageParameters = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Slot count for connections created without an explicit capacity
    pub default_capacity: usize,
    /// Poll interval used by `ConsumptionStrategy::BoundedPoll` consumers
    pub poll_interval_ms: u64,
    /// Retry policy handed to consumer stages
    pub retry: RetryPolicy,
    /// Parameters keyed by stage name
    pub stages: BTreeMap<String, StageParameters>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_capacity: DEFAULT_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry: RetryPolicy::default(),
            stages: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_capacity == 0 {
            return Err(PipelineError::Config(
                "default_capacity must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(PipelineError::Config(
                "poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// `BoundedPoll` strategy using the configured interval
    pub fn bounded_poll(&self) -> ConsumptionStrategy {
        ConsumptionStrategy::BoundedPoll(self.poll_interval())
    }

    pub fn stage_parameters(&self, stage: &str) -> Option<&StageParameters> {
        self.stages.get(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.default_capacity, 1);
        assert_eq!(config.retry, RetryPolicy::never());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_document() {
        let config = PipelineConfig::from_toml_str(
            r#"
            default_capacity = 4
            poll_interval_ms = 25

            [retry]
            max_attempts = 3
            backoff_ms = 10

            [stages.sink]
            login = "writer"
            entityName = "results"
            "#,
        )
        .unwrap();

        assert_eq!(config.default_capacity, 4);
        assert_eq!(
            config.bounded_poll(),
            ConsumptionStrategy::BoundedPoll(Duration::from_millis(25))
        );
        assert_eq!(config.retry.max_attempts, 3);
        let sink = config.stage_parameters("sink").unwrap();
        assert_eq!(sink.get("login").map(String::as_str), Some("writer"));
        assert!(config.stage_parameters("missing").is_none());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config = PipelineConfig::from_toml_str("default_capacity = 2").unwrap();
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = PipelineConfig::from_toml_str("default_capacity = 0").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = PipelineConfig::from_toml_str("[retry]\nmax_attempts = 0").unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_toml_roundtrip_preserves_stage_tables() {
        let mut config = PipelineConfig::default();
        config
            .stages
            .entry("sink".into())
            .or_default()
            .insert("db".into(), "testdb".into());
        let text = config.to_toml_string().unwrap();
        assert_eq!(PipelineConfig::from_toml_str(&text).unwrap(), config);
    }
}
