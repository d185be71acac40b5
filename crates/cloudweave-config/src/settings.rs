//! Engine settings
//!
//! Every wait primitive in the engine takes its cadence from one of these
//! entries. Defaults mirror the values the provider drivers have been tuned to.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Poll cadence for one class of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Delay between two polls
    pub interval_ms: u64,

    /// Total budget for the wait
    pub timeout_ms: u64,

    /// Grace delay before the first poll
    #[serde(default)]
    pub initial_delay_ms: u64,
}

impl PollSettings {
    pub const fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval_ms,
            timeout_ms,
            initial_delay_ms: 0,
        }
    }

    pub const fn with_initial_delay(mut self, initial_delay_ms: u64) -> Self {
        self.initial_delay_ms = initial_delay_ms;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    fn validate(&self, field: &str) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                field: field.to_string(),
                message: "interval_ms must be greater than zero".to_string(),
            });
        }
        if self.interval_ms > self.timeout_ms {
            return Err(ConfigError::InvalidSetting {
                field: field.to_string(),
                message: format!(
                    "interval_ms ({}) exceeds timeout_ms ({})",
                    self.interval_ms, self.timeout_ms
                ),
            });
        }
        Ok(())
    }
}

/// Budget for the fixed-interval retry envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub interval_ms: u64,
    pub max_duration_ms: u64,
}

impl RetrySettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            max_duration_ms: 60_000,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Generic async jobs (create VM, attach disk, rebuild root)
    pub task: PollSettings,

    /// Image creation and import jobs
    pub image_task: PollSettings,

    /// Start / stop convergence
    pub power: PollSettings,

    /// Deletion convergence
    pub delete: PollSettings,

    /// EIP allocation and association
    pub eip: PollSettings,

    /// Instance resize; providers report stale status right after the call
    pub resize: PollSettings,

    /// NAT gateway and NAT entry convergence
    pub nat: PollSettings,

    /// Waiting for a prepaid order to materialize its resource
    pub order: PollSettings,

    /// Waiting for a freshly created resource to become visible
    pub create: PollSettings,

    pub retry: RetrySettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task: PollSettings::new(15_000, 900_000),
            image_task: PollSettings::new(15_000, 600_000),
            power: PollSettings::new(10_000, 300_000),
            delete: PollSettings::new(10_000, 300_000),
            eip: PollSettings::new(5_000, 60_000),
            resize: PollSettings::new(15_000, 180_000).with_initial_delay(15_000),
            nat: PollSettings::new(5_000, 300_000),
            order: PollSettings::new(5_000, 900_000),
            create: PollSettings::new(10_000, 300_000),
            retry: RetrySettings::default(),
        }
    }
}

impl EngineConfig {
    /// Check every poll entry for a usable cadence
    pub fn validate(&self) -> Result<()> {
        let entries = [
            ("task", &self.task),
            ("image_task", &self.image_task),
            ("power", &self.power),
            ("delete", &self.delete),
            ("eip", &self.eip),
            ("resize", &self.resize),
            ("nat", &self.nat),
            ("order", &self.order),
            ("create", &self.create),
        ];
        for (field, settings) in entries {
            settings.validate(field)?;
        }

        if self.retry.interval_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "retry".to_string(),
                message: "interval_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.task.interval(), Duration::from_secs(15));
        assert_eq!(config.task.timeout(), Duration::from_secs(900));
        assert_eq!(config.resize.initial_delay(), Duration::from_secs(15));
        assert_eq!(config.eip.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
power:
  interval_ms: 2000
  timeout_ms: 20000
retry:
  interval_ms: 500
  max_duration_ms: 5000
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.power, PollSettings::new(2_000, 20_000));
        assert_eq!(config.retry.max_duration(), Duration::from_secs(5));
        assert_eq!(config.task, EngineConfig::default().task);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = EngineConfig::default();
        config.delete.interval_ms = 0;

        match config.validate() {
            Err(ConfigError::InvalidSetting { field, .. }) => assert_eq!(field, "delete"),
            other => panic!("Expected InvalidSetting, got {:?}", other),
        }
    }

    #[test]
    fn test_interval_longer_than_timeout_rejected() {
        let mut config = EngineConfig::default();
        config.eip = PollSettings::new(90_000, 60_000);
        assert!(config.validate().is_err());
    }
}
