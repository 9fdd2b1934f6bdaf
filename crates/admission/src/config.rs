//! Webhook server configuration

use admission_lib::{FeatureGates, Quantity};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const ENV_PREFIX: &str = "VPA_ADMISSION";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// Webhook server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Port serving admission reviews, health and metrics
    #[serde(default = "default_port")]
    pub port: u16,

    /// Comma-separated `Name=true|false` feature gate overrides
    #[serde(default)]
    pub feature_gates: String,

    /// Deadline used when a review does not carry a `timeout` parameter
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Upper bound for boosted CPU, as a quantity string
    #[serde(default)]
    pub boost_max_cpu: Option<String>,

    /// Read policies from the cluster; an empty in-memory store otherwise
    #[serde(default = "default_kube_enabled")]
    pub kube_enabled: bool,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

fn default_port() -> u16 {
    8000
}

fn default_request_timeout() -> u64 {
    10
}

fn default_kube_enabled() -> bool {
    true
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

impl AdmissionConfig {
    /// Load configuration from `VPA_ADMISSION_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Load configuration from an explicit variable map instead of the process environment
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn from_environment(environment: config::Environment) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(environment.try_parsing(true))
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        config.features()?;
        config.boost_max_cpu()?;
        Ok(config)
    }

    pub fn features(&self) -> Result<FeatureGates> {
        self.feature_gates
            .parse()
            .with_context(|| format!("invalid feature gates {:?}", self.feature_gates))
    }

    pub fn boost_max_cpu(&self) -> Result<Option<Quantity>> {
        self.boost_max_cpu
            .as_deref()
            .map(|raw| {
                raw.parse::<Quantity>()
                    .with_context(|| format!("invalid boost_max_cpu {:?}", raw))
            })
            .transpose()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admission_lib::Feature;

    fn vars(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = AdmissionConfig::from_vars(HashMap::new()).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert!(config.kube_enabled);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.boost_max_cpu().unwrap(), None);
        assert_eq!(config.features().unwrap(), FeatureGates::default());
    }

    #[test]
    fn test_environment_overrides() {
        let config = AdmissionConfig::from_vars(vars(&[
            ("VPA_ADMISSION_PORT", "9443"),
            ("VPA_ADMISSION_FEATURE_GATES", "InPlaceOrRecreate=true"),
            ("VPA_ADMISSION_BOOST_MAX_CPU", "4"),
            ("VPA_ADMISSION_KUBE_ENABLED", "false"),
            ("VPA_ADMISSION_LOG_FORMAT", "text"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9443);
        assert!(!config.kube_enabled);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.features().unwrap().is_enabled(Feature::InPlaceOrRecreate));
        assert_eq!(config.boost_max_cpu().unwrap(), Some("4".parse().unwrap()));
    }

    #[test]
    fn test_unknown_feature_gate_fails_loading() {
        let result = AdmissionConfig::from_vars(vars(&[(
            "VPA_ADMISSION_FEATURE_GATES",
            "NoSuchGate=true",
        )]));
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_boost_cap_fails_loading() {
        let result = AdmissionConfig::from_vars(vars(&[("VPA_ADMISSION_BOOST_MAX_CPU", "lots")]));
        assert!(result.is_err());
    }
}
