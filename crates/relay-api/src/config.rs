use std::collections::HashMap;
use std::env;
use std::time::Duration;

use relay_core::settings::EngineSettings;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: String,
    pub state_db_path: Option<String>,
    pub capture_ttl: Duration,
    pub operation_timeout: Duration,
    pub max_retries: u32,
    pub error_threshold: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "RELAY_API_BIND_ADDR", "127.0.0.1:8080");
        let db_path = required_trimmed(&lookup, "RELAY_DB_PATH")?;

        // Absent means captured records live in process memory only.
        let state_db_path = optional_trimmed(&lookup, "RELAY_STATE_DB_PATH");

        let capture_ttl_secs = value_or_default(&lookup, "RELAY_STATE_TTL_SECS", "14400")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RELAY_STATE_TTL_SECS must be an integer in [60, 604800]".to_string(),
                )
            })?;
        if !(60..=604_800).contains(&capture_ttl_secs) {
            return Err(ConfigError::Invalid(
                "RELAY_STATE_TTL_SECS must be in [60, 604800]".to_string(),
            ));
        }

        let operation_timeout_secs =
            value_or_default(&lookup, "RELAY_OPERATION_TIMEOUT_SECS", "30")
                .parse::<u64>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "RELAY_OPERATION_TIMEOUT_SECS must be an integer in [1, 600]".to_string(),
                    )
                })?;
        if !(1..=600).contains(&operation_timeout_secs) {
            return Err(ConfigError::Invalid(
                "RELAY_OPERATION_TIMEOUT_SECS must be in [1, 600]".to_string(),
            ));
        }

        let max_retries = value_or_default(&lookup, "RELAY_MAX_RETRIES", "3")
            .parse::<u32>()
            .map_err(|_| {
                ConfigError::Invalid("RELAY_MAX_RETRIES must be an integer in [0, 10]".to_string())
            })?;
        if max_retries > 10 {
            return Err(ConfigError::Invalid(
                "RELAY_MAX_RETRIES must be in [0, 10]".to_string(),
            ));
        }

        let error_threshold = value_or_default(&lookup, "RELAY_ERROR_THRESHOLD", "25")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RELAY_ERROR_THRESHOLD must be an integer in [1, 10000]".to_string(),
                )
            })?;
        if !(1..=10_000).contains(&error_threshold) {
            return Err(ConfigError::Invalid(
                "RELAY_ERROR_THRESHOLD must be in [1, 10000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            db_path,
            state_db_path,
            capture_ttl: Duration::from_secs(capture_ttl_secs),
            operation_timeout: Duration::from_secs(operation_timeout_secs),
            max_retries,
            error_threshold,
        })
    }

    /// Engine settings derived from this configuration
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            capture_ttl: self.capture_ttl,
            operation_timeout: self.operation_timeout,
            max_retries: self.max_retries,
            error_threshold: self.error_threshold,
            ..EngineSettings::default()
        }
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_map(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_a_database_path() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = from_map(&map).unwrap_err();
        assert!(err.to_string().contains("RELAY_DB_PATH"));
    }

    #[test]
    fn config_defaults_are_applied() {
        let mut map = HashMap::new();
        map.insert("RELAY_DB_PATH", "/tmp/relay.db");
        let config = from_map(&map).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.capture_ttl, Duration::from_secs(14_400));
        assert!(config.state_db_path.is_none());
        assert_eq!(config.error_threshold, 25);
    }

    #[test]
    fn config_rejects_out_of_range_ttl() {
        let mut map = HashMap::new();
        map.insert("RELAY_DB_PATH", "/tmp/relay.db");
        map.insert("RELAY_STATE_TTL_SECS", "10");
        assert!(from_map(&map).is_err());
    }
}
