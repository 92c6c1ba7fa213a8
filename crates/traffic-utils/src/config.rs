//! Configuration management utilities

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application name
    pub app_name: String,
    /// Environment (dev, prod, etc.)
    pub environment: String,
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub log_filter: String,
    /// Emit logs as JSON lines instead of human-readable text
    pub json_logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "traffic-light".to_string(),
            environment: "development".to_string(),
            log_filter: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Config {
    /// Build a config from `TRAFFIC_ENV`, `TRAFFIC_LOG_FILTER` and `TRAFFIC_LOG_JSON`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(env) = std::env::var("TRAFFIC_ENV") {
            config.environment = env;
        }
        if let Ok(filter) = std::env::var("TRAFFIC_LOG_FILTER") {
            config.log_filter = filter;
        }
        if let Ok(flag) = std::env::var("TRAFFIC_LOG_JSON") {
            config.json_logs = parse_flag(&flag);
        }

        config
    }

    /// Set the application name
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable JSON log output
    pub fn with_json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = enabled;
        self
    }

    /// Whether this is a production deployment
    pub fn is_production(&self) -> bool {
        matches!(self.environment.as_str(), "prod" | "production")
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.app_name, "traffic-light");
        assert_eq!(config.log_filter, "info");
        assert!(!config.json_logs);
        assert!(!config.is_production());
    }

    #[test]
    fn test_builder_methods() {
        let config = Config::default()
            .with_app_name("traffic-cli")
            .with_json_logs(true);

        assert_eq!(config.app_name, "traffic-cli");
        assert!(config.json_logs);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" yes "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("nope"));
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = Config {
            environment: "production".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_production());
    }
}
