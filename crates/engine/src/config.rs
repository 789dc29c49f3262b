//! Orchestrator configuration.
//!
//! Every field has a default.  Values can be overridden from `AUTOFLOW_*`
//! environment variables, e.g. `AUTOFLOW_MAX_CONCURRENT_WORKFLOWS=25` or
//! `AUTOFLOW_RETENTION=12h`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::durations;

pub const ENV_PREFIX: &str = "AUTOFLOW_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Ceiling on non-terminal instances.
    pub max_concurrent_workflows: usize,
    /// Stage timeout when neither the stage nor the definition sets one.
    #[serde(with = "durations")]
    pub default_stage_timeout: Duration,
    #[serde(with = "durations")]
    pub cleanup_interval: Duration,
    /// Terminal instances older than this are removed by cleanup.
    #[serde(with = "durations")]
    pub retention: Duration,
    #[serde(with = "durations")]
    pub monitor_interval: Duration,
    #[serde(with = "durations")]
    pub metrics_interval: Duration,
    /// Running instances older than this are reported by the monitor.
    #[serde(with = "durations")]
    pub stall_threshold: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 10,
            default_stage_timeout: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
            monitor_interval: Duration::from_secs(30),
            metrics_interval: Duration::from_secs(60),
            stall_threshold: Duration::from_secs(60 * 60),
        }
    }
}

impl OrchestratorConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed(ENV_PREFIX).from_env::<Self>()
    }

    /// Load from an explicit set of `(KEY, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX).from_iter(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_workflows, 10);
        assert_eq!(config.default_stage_timeout, Duration::from_secs(1800));
        assert_eq!(config.retention, Duration::from_secs(86_400));
    }

    #[test]
    fn overrides_from_prefixed_vars() {
        let config = OrchestratorConfig::from_vars(vec![
            ("AUTOFLOW_MAX_CONCURRENT_WORKFLOWS".to_owned(), "25".to_owned()),
            ("AUTOFLOW_RETENTION".to_owned(), "12h".to_owned()),
            ("AUTOFLOW_MONITOR_INTERVAL".to_owned(), "5".to_owned()),
            ("UNRELATED".to_owned(), "x".to_owned()),
        ])
        .unwrap();

        assert_eq!(config.max_concurrent_workflows, 25);
        assert_eq!(config.retention, Duration::from_secs(12 * 3600));
        assert_eq!(config.monitor_interval, Duration::from_secs(5));
        assert_eq!(config.cleanup_interval, Duration::from_secs(3600));
    }

    #[test]
    fn bad_duration_is_rejected() {
        let result = OrchestratorConfig::from_vars(vec![(
            "AUTOFLOW_RETENTION".to_owned(),
            "forever".to_owned(),
        )]);
        assert!(result.is_err());
    }
}
