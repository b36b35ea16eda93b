use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::{Config, TierPolicy};
use crate::domain::models::Tier;

/// Project directory holding config, database and logs
pub const PROJECT_DIR: &str = ".strategist";

/// Environment variable prefix; `__` separates nested keys
pub const ENV_PREFIX: &str = "STRATEGIST_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid requests_per_second: {0}. Must be at least 1")]
    InvalidRateLimit(u32),

    #[error("Invalid failure_threshold: {0}. Must be at least 1")]
    InvalidFailureThreshold(u32),

    #[error("Invalid jitter_factor: {0}. Must be between 0.0 and 1.0")]
    InvalidJitter(f64),

    #[error("Invalid {tier} policy: base delay {base_ms}ms must not exceed max delay {max_ms}ms")]
    InvalidBackoff { tier: Tier, base_ms: u64, max_ms: u64 },

    #[error("Invalid {tier} policy: min_parts_for_partial_success {min} must be between 1 and {parts}")]
    InvalidPartialThreshold { tier: Tier, min: u8, parts: u8 },

    #[error("Invalid retry queue: base_delay_secs ({0}) must not exceed max_delay_secs ({1})")]
    InvalidQueueBackoff(u64, u64),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the project directory
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .strategist/config.yaml (project config, created by init)
    /// 3. .strategist/local.yaml (local overrides, optional)
    /// 4. Environment variables (STRATEGIST_* prefix)
    pub fn load() -> Result<Config> {
        Self::load_from(PROJECT_DIR)
    }

    /// Same hierarchy rooted at another directory
    pub fn load_from(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, without env overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Default configuration rendered as YAML, written by `init`
    pub fn default_yaml() -> Result<String> {
        serde_yaml::to_string(&Config::default()).context("Failed to serialize default config")
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.llm.requests_per_second == 0 {
            return Err(ConfigError::InvalidRateLimit(config.llm.requests_per_second));
        }
        if config.llm.model.is_empty() {
            return Err(ConfigError::ValidationFailed("llm.model cannot be empty".to_string()));
        }

        if config.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(
                config.circuit_breaker.failure_threshold,
            ));
        }

        let queue = &config.retry_queue;
        if !(0.0..=1.0).contains(&queue.jitter_factor) {
            return Err(ConfigError::InvalidJitter(queue.jitter_factor));
        }
        if queue.base_delay_secs > queue.max_delay_secs {
            return Err(ConfigError::InvalidQueueBackoff(
                queue.base_delay_secs,
                queue.max_delay_secs,
            ));
        }
        if queue.batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry_queue.batch_size must be at least 1".to_string(),
            ));
        }

        for tier in Tier::all() {
            Self::validate_policy(tier, config.tiers.policy(tier))?;
        }

        Ok(())
    }

    fn validate_policy(tier: Tier, policy: &TierPolicy) -> Result<(), ConfigError> {
        if policy.base_delay_ms > policy.max_delay_ms {
            return Err(ConfigError::InvalidBackoff {
                tier,
                base_ms: policy.base_delay_ms,
                max_ms: policy.max_delay_ms,
            });
        }
        let parts = tier.part_count();
        if policy.min_parts_for_partial_success == 0 || policy.min_parts_for_partial_success > parts
        {
            return Err(ConfigError::InvalidPartialThreshold {
                tier,
                min: policy.min_parts_for_partial_success,
                parts,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.path, ".strategist/strategist.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.retry_queue.max_retries, 5);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
database:
  path: /custom/path.db
  max_connections: 5
logging:
  level: debug
  format: pretty
circuit_breaker:
  failure_threshold: 3
tiers:
  full:
    max_retries: 2
    base_delay_ms: 100
    max_delay_ms: 1000
    min_parts_for_partial_success: 5
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.tiers.full.min_parts_for_partial_success, 5);
        assert_eq!(config.tiers.medium.max_retries, 3, "untouched tier keeps defaults");
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));
    }

    #[test]
    fn test_validate_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyDatabasePath)
        ));
    }

    #[test]
    fn test_validate_partial_threshold_above_part_count() {
        let mut config = Config::default();
        config.tiers.medium.min_parts_for_partial_success = 3;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidPartialThreshold { tier: Tier::Medium, min: 3, parts: 2 })
        ));
    }

    #[test]
    fn test_validate_inverted_backoff() {
        let mut config = Config::default();
        config.tiers.standard.base_delay_ms = 60_000;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff { tier: Tier::Standard, .. })
        ));
    }

    #[test]
    fn test_validate_jitter_range() {
        let mut config = Config::default();
        config.retry_queue.jitter_factor = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidJitter(_))
        ));
    }

    #[test]
    fn test_hierarchical_merging_with_env_override() {
        let dir = tempfile::tempdir().unwrap();

        let mut base = std::fs::File::create(dir.path().join("config.yaml")).unwrap();
        writeln!(base, "logging:\n  level: info\n  format: json\nretry_queue:\n  batch_size: 3").unwrap();
        let mut local = std::fs::File::create(dir.path().join("local.yaml")).unwrap();
        writeln!(local, "logging:\n  level: debug").unwrap();

        temp_env::with_vars(
            [
                ("STRATEGIST_RETRY_QUEUE__BATCH_SIZE", Some("9")),
                ("STRATEGIST_LLM__MODEL", Some("test-model")),
            ],
            || {
                let config = ConfigLoader::load_from(dir.path()).unwrap();
                assert_eq!(config.logging.level, "debug", "local.yaml should win");
                assert_eq!(config.logging.format, "json", "base value should persist");
                assert_eq!(config.retry_queue.batch_size, 9, "env should win");
                assert_eq!(config.llm.model, "test-model");
            },
        );
    }

    #[test]
    fn test_default_yaml_round_trips() {
        let yaml = ConfigLoader::default_yaml().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.retry_queue.poll_interval_secs, 60);
    }
}
