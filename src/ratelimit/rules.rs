//! Rate limit rules loaded from configuration.
//!
//! A rule names a strategy and its limit, and builds the matching mapping.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::backend::RateLimiter;
use super::clock::MonotonicClock;
use super::counter::Strategy;
use super::limiter::{LimitConfig, SweepConfig};
use super::mapping::{DynamicMapping, FixedMapping, JumpingWindow};
use crate::error::{FloodgateError, Result};

/// A named rate limit.
///
/// The window is given either in milliseconds (`window_ms`) or as a time
/// unit (`unit`), but not both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitRule {
    /// Name the rule is looked up by
    pub name: String,
    /// Counting strategy
    #[serde(default = "default_strategy")]
    pub strategy: Strategy,
    /// Admits allowed per window
    pub capacity: u64,
    /// Window length in milliseconds
    #[serde(default)]
    pub window_ms: Option<u64>,
    /// Window length as a time unit
    #[serde(default)]
    pub unit: Option<TimeUnit>,
    /// Load adaptation strength for dynamic windows
    #[serde(default)]
    pub decay: Option<f64>,
}

fn default_strategy() -> Strategy {
    Strategy::Fixed
}

/// Time unit for rate limit windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

impl LimitRule {
    /// The window length this rule specifies.
    pub fn window(&self) -> Result<Duration> {
        match (self.window_ms, self.unit) {
            (Some(window_ms), None) => Ok(Duration::from_millis(window_ms)),
            (None, Some(unit)) => Ok(unit.duration()),
            (Some(_), Some(_)) => Err(FloodgateError::Config(format!(
                "rule '{}' sets both window_ms and unit",
                self.name
            ))),
            (None, None) => Err(FloodgateError::Config(format!(
                "rule '{}' needs window_ms or unit",
                self.name
            ))),
        }
    }

    /// Convert the rule into a validated [`LimitConfig`].
    pub fn to_limit_config(&self) -> Result<LimitConfig> {
        if self.decay.is_some() && self.strategy != Strategy::Dynamic {
            return Err(FloodgateError::Config(format!(
                "rule '{}' sets decay, which only dynamic windows use",
                self.name
            )));
        }

        let config = LimitConfig::new(self.capacity, self.window()?)
            .with_decay(self.decay.unwrap_or(0.0));
        config
            .validate()
            .map_err(|e| FloodgateError::Config(format!("rule '{}': {}", self.name, e)))?;
        Ok(config)
    }

    /// Build the mapping this rule describes, driven by the system clock.
    pub fn build(&self, sweep: SweepConfig) -> Result<Arc<dyn RateLimiter<String>>> {
        let config = self.to_limit_config()?;
        let clock = MonotonicClock::new();

        info!(
            rule = %self.name,
            strategy = ?self.strategy,
            capacity = config.capacity,
            window_ms = config.window.as_millis() as u64,
            "Building rate limit mapping"
        );

        let limiter: Arc<dyn RateLimiter<String>> = match self.strategy {
            Strategy::Fixed => {
                Arc::new(FixedMapping::<String, _>::new(config, clock)?.with_sweep(sweep))
            }
            Strategy::Dynamic => {
                Arc::new(DynamicMapping::<String, _>::new(config, clock)?.with_sweep(sweep))
            }
            Strategy::Jumping => {
                Arc::new(JumpingWindow::<String, _>::new(config, clock)?.with_sweep(sweep))
            }
        };
        Ok(limiter)
    }
}
