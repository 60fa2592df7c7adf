//! Configuration management for floodgate.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{FloodgateError, Result};
use crate::ratelimit::{LimitRule, Strategy, SweepConfig, TimeUnit};

/// Default limit when no rules are configured.
const DEFAULT_CAPACITY: u64 = 1000;

/// Main configuration for floodgate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Idle-key sweeping configuration
    #[serde(default)]
    pub sweep: SweepSettings,

    /// Named rate limits
    #[serde(default = "default_limits")]
    pub limits: Vec<LimitRule>,
}

impl Default for FloodgateConfig {
    fn default() -> Self {
        Self {
            sweep: SweepSettings::default(),
            limits: default_limits(),
        }
    }
}

fn default_limits() -> Vec<LimitRule> {
    vec![LimitRule {
        name: "default".to_string(),
        strategy: Strategy::Fixed,
        capacity: DEFAULT_CAPACITY,
        window_ms: None,
        unit: Some(TimeUnit::Second),
        decay: None,
    }]
}

/// Idle-key sweeping configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Background sweeper period in milliseconds
    #[serde(default = "default_sweep_interval")]
    pub interval_ms: u64,

    /// Opportunistic sweep every this many checks (0 disables)
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Idle time before a key is swept, in milliseconds. Defaults to twice
    /// each mapping's window.
    #[serde(default)]
    pub idle_threshold_ms: Option<u64>,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_sweep_interval(),
            check_interval: default_check_interval(),
            idle_threshold_ms: None,
        }
    }
}

fn default_sweep_interval() -> u64 {
    1000
}

fn default_check_interval() -> u64 {
    SweepConfig::default().check_interval
}

impl SweepSettings {
    /// Background sweeper period.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// The per-mapping sweep policy these settings describe.
    pub fn to_sweep_config(&self) -> SweepConfig {
        let sweep = SweepConfig::default().with_check_interval(self.check_interval);
        match self.idle_threshold_ms {
            Some(ms) => sweep.with_idle_threshold(Duration::from_millis(ms)),
            None => sweep,
        }
    }
}

impl FloodgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading floodgate configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: FloodgateConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every rule and reject duplicate rule names.
    pub fn validate(&self) -> Result<()> {
        if self.sweep.interval_ms == 0 {
            return Err(FloodgateError::Config(
                "sweep interval_ms must be greater than zero".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for rule in &self.limits {
            if !names.insert(rule.name.as_str()) {
                return Err(FloodgateError::Config(format!(
                    "duplicate rule name '{}'",
                    rule.name
                )));
            }
            rule.to_limit_config()?;
        }
        Ok(())
    }

    /// Find a rule by name.
    pub fn rule(&self, name: &str) -> Option<&LimitRule> {
        self.limits.iter().find(|rule| rule.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FloodgateConfig::default();
        assert_eq!(config.sweep.interval_ms, 1000);
        assert_eq!(config.sweep.check_interval, 4096);

        let rule = config.rule("default").unwrap();
        assert_eq!(rule.capacity, 1000);
        assert_eq!(rule.window().unwrap(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
sweep:
  interval_ms: 250
  check_interval: 0
  idle_threshold_ms: 5000
limits:
  - name: api
    strategy: fixed
    capacity: 100
    window_ms: 1000
  - name: search
    strategy: dynamic
    capacity: 20
    unit: second
    decay: 0.5
  - name: login
    strategy: jumping
    capacity: 5
    unit: minute
"#;
        let config = FloodgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limits.len(), 3);
        assert_eq!(config.rule("search").unwrap().strategy, Strategy::Dynamic);
        assert_eq!(config.sweep.interval(), Duration::from_millis(250));

        let sweep = config.sweep.to_sweep_config();
        assert_eq!(sweep.check_interval, 0);
        assert_eq!(sweep.idle_threshold, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = FloodgateConfig::from_yaml("sweep:\n  interval_ms: 10\n").unwrap();
        assert_eq!(config.limits, default_limits());
        assert_eq!(config.sweep.check_interval, 4096);
        assert_eq!(config.sweep.to_sweep_config().idle_threshold, None);
    }

    #[test]
    fn test_duplicate_rule_names_rejected() {
        let yaml = r#"
limits:
  - name: api
    capacity: 1
    unit: second
  - name: api
    capacity: 2
    unit: second
"#;
        let err = FloodgateConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let yaml = r#"
limits:
  - name: api
    capacity: 0
    unit: second
"#;
        assert!(matches!(
            FloodgateConfig::from_yaml(yaml),
            Err(FloodgateError::Config(_))
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            FloodgateConfig::from_yaml("limits: [unclosed"),
            Err(FloodgateError::Yaml(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            FloodgateConfig::from_file("/nonexistent/floodgate.yaml"),
            Err(FloodgateError::Io(_))
        ));
    }
}
