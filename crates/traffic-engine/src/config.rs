//! Configuration for the analysis orchestrator

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and circuit-breaker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Failed requests before a symbol's circuit opens
    pub failure_threshold: u32,

    /// How long an open circuit rejects requests
    pub circuit_cooldown: Duration,

    /// Age after which an in-flight entry is considered leaked
    pub stale_after: Duration,

    /// How often leaked entries are swept
    pub sweep_interval: Duration,

    /// Retry hint given to duplicate requests
    pub in_flight_retry_after: Duration,

    /// Deadline for a coupled (streaming) run
    pub global_timeout: Duration,

    /// Deadline for one staged phase
    pub phase_timeout: Duration,

    /// Interval between heartbeat events
    pub heartbeat_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            circuit_cooldown: Duration::from_secs(300),    // 5 minutes
            stale_after: Duration::from_secs(300),         // 5 minutes
            sweep_interval: Duration::from_secs(60),       // 1 minute
            in_flight_retry_after: Duration::from_secs(15),
            global_timeout: Duration::from_secs(120),
            phase_timeout: Duration::from_secs(120),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Apply `TRAFFIC_*` environment overrides
    pub fn with_env(mut self) -> Result<Self> {
        if let Some(secs) = env_u64("TRAFFIC_GLOBAL_TIMEOUT_SECS")? {
            self.global_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("TRAFFIC_PHASE_TIMEOUT_SECS")? {
            self.phase_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("TRAFFIC_HEARTBEAT_SECS")? {
            self.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("TRAFFIC_CIRCUIT_COOLDOWN_SECS")? {
            self.circuit_cooldown = Duration::from_secs(secs);
        }
        if let Some(threshold) = env_u64("TRAFFIC_FAILURE_THRESHOLD")? {
            self.failure_threshold = u32::try_from(threshold).map_err(|_| {
                EngineError::ConfigError(format!("TRAFFIC_FAILURE_THRESHOLD out of range: {threshold}"))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(EngineError::ConfigError(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }

        let non_zero = [
            ("global_timeout", self.global_timeout),
            ("phase_timeout", self.phase_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("sweep_interval", self.sweep_interval),
            ("stale_after", self.stale_after),
        ];
        for (name, value) in non_zero {
            if value.is_zero() {
                return Err(EngineError::ConfigError(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        Ok(())
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| EngineError::ConfigError(format!("{name}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Builder for EngineConfig
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    failure_threshold: Option<u32>,
    circuit_cooldown: Option<Duration>,
    stale_after: Option<Duration>,
    sweep_interval: Option<Duration>,
    in_flight_retry_after: Option<Duration>,
    global_timeout: Option<Duration>,
    phase_timeout: Option<Duration>,
    heartbeat_interval: Option<Duration>,
}

impl EngineConfigBuilder {
    /// Set the circuit-breaker failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Set the circuit cooldown
    pub fn circuit_cooldown(mut self, duration: Duration) -> Self {
        self.circuit_cooldown = Some(duration);
        self
    }

    /// Set the stale entry age
    pub fn stale_after(mut self, duration: Duration) -> Self {
        self.stale_after = Some(duration);
        self
    }

    /// Set the sweep interval
    pub fn sweep_interval(mut self, duration: Duration) -> Self {
        self.sweep_interval = Some(duration);
        self
    }

    /// Set the retry hint for duplicate requests
    pub fn in_flight_retry_after(mut self, duration: Duration) -> Self {
        self.in_flight_retry_after = Some(duration);
        self
    }

    /// Set the coupled-mode deadline
    pub fn global_timeout(mut self, duration: Duration) -> Self {
        self.global_timeout = Some(duration);
        self
    }

    /// Set the staged phase deadline
    pub fn phase_timeout(mut self, duration: Duration) -> Self {
        self.phase_timeout = Some(duration);
        self
    }

    /// Set the heartbeat interval
    pub fn heartbeat_interval(mut self, duration: Duration) -> Self {
        self.heartbeat_interval = Some(duration);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<EngineConfig> {
        let defaults = EngineConfig::default();

        let config = EngineConfig {
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            circuit_cooldown: self.circuit_cooldown.unwrap_or(defaults.circuit_cooldown),
            stale_after: self.stale_after.unwrap_or(defaults.stale_after),
            sweep_interval: self.sweep_interval.unwrap_or(defaults.sweep_interval),
            in_flight_retry_after: self
                .in_flight_retry_after
                .unwrap_or(defaults.in_flight_retry_after),
            global_timeout: self.global_timeout.unwrap_or(defaults.global_timeout),
            phase_timeout: self.phase_timeout.unwrap_or(defaults.phase_timeout),
            heartbeat_interval: self.heartbeat_interval.unwrap_or(defaults.heartbeat_interval),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.circuit_cooldown, Duration::from_secs(300));
        assert_eq!(config.in_flight_retry_after, Duration::from_secs(15));
        assert_eq!(config.global_timeout, Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::builder()
            .failure_threshold(5)
            .global_timeout(Duration::from_secs(30))
            .build()
            .unwrap();

        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.global_timeout, Duration::from_secs(30));
        assert_eq!(config.phase_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_validation_rejects_zero() {
        assert!(EngineConfig::builder().failure_threshold(0).build().is_err());

        let err = EngineConfig::builder()
            .heartbeat_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("heartbeat_interval"));
    }

    #[test]
    fn test_env_overrides() {
        // SAFETY: variables are only read by this test
        unsafe {
            std::env::set_var("TRAFFIC_PHASE_TIMEOUT_SECS", "45");
            std::env::set_var("TRAFFIC_HEARTBEAT_SECS", "2");
        }
        let config = EngineConfig::default().with_env().unwrap();
        assert_eq!(config.phase_timeout, Duration::from_secs(45));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(2));

        unsafe {
            std::env::set_var("TRAFFIC_HEARTBEAT_SECS", "soon");
        }
        assert!(EngineConfig::default().with_env().is_err());

        unsafe {
            std::env::remove_var("TRAFFIC_PHASE_TIMEOUT_SECS");
            std::env::remove_var("TRAFFIC_HEARTBEAT_SECS");
        }
    }
}
