//! Project initialization
//!
//! Creates the `.strategist/` directory, writes the default configuration
//! and applies database migrations.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::config::PROJECT_DIR;
use super::database::DatabaseConnection;

/// Default configuration template content
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Strategist Configuration
# Override settings by editing this file, adding .strategist/local.yaml,
# or setting environment variables with the STRATEGIST_ prefix.
#
# Example environment variables:
#   export STRATEGIST_LLM__API_KEY=sk-ant-...
#   export STRATEGIST_RETRY_QUEUE__POLL_INTERVAL_SECS=30
#   export STRATEGIST_LOGGING__LEVEL=debug

database:
  path: ".strategist/strategist.db"
  max_connections: 10

logging:
  # trace, debug, info, warn, error
  level: "info"
  # json or pretty
  format: "json"
  log_dir: ".strategist/logs"
  retention_days: 30

llm:
  model: "claude-sonnet-4-5-20250929"
  base_url: "https://api.anthropic.com"
  timeout_secs: 300
  max_tokens: 8192
  requests_per_second: 5

circuit_breaker:
  enabled: true
  # Consecutive failures before the circuit opens
  failure_threshold: 5
  cooldown_secs: 60
  failure_window_secs: 600

retry_queue:
  poll_interval_secs: 60
  batch_size: 5
  max_retries: 5
  base_delay_secs: 60
  max_delay_secs: 3600
  jitter_factor: 0.2

# Per-tier in-run retries and partial delivery threshold
tiers:
  standard:
    max_retries: 3
    base_delay_ms: 2000
    max_delay_ms: 30000
    min_parts_for_partial_success: 1
  medium:
    max_retries: 3
    base_delay_ms: 3000
    max_delay_ms: 60000
    min_parts_for_partial_success: 1
  full:
    max_retries: 4
    base_delay_ms: 5000
    max_delay_ms: 120000
    min_parts_for_partial_success: 4

notifications: {}
  # email_webhook_url: "https://hooks.example.com/email"
  # owner_webhook_url: "https://hooks.example.com/owner"
"#;

/// Setup paths and directories
#[derive(Debug, Clone)]
pub struct SetupPaths {
    pub root: PathBuf,
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub database_file: PathBuf,
    pub logs_dir: PathBuf,
}

impl SetupPaths {
    /// Setup paths for the current directory
    pub fn new() -> Result<Self> {
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;
        Ok(Self::at(current_dir))
    }

    pub fn at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let config_dir = root.join(PROJECT_DIR);
        Self {
            config_file: config_dir.join("config.yaml"),
            database_file: config_dir.join("strategist.db"),
            logs_dir: config_dir.join("logs"),
            config_dir,
            root,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.config_file.exists() && self.database_file.exists()
    }
}

/// Create the configuration and log directories; returns the ones created
pub fn create_config_dir(paths: &SetupPaths) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    for dir in [&paths.config_dir, &paths.logs_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            created.push(dir.clone());
        }
    }
    Ok(created)
}

/// Write the default configuration file; returns whether it was written
pub fn create_config_file(paths: &SetupPaths, force: bool) -> Result<bool> {
    if paths.config_file.exists() && !force {
        return Ok(false);
    }
    fs::write(&paths.config_file, DEFAULT_CONFIG_TEMPLATE).context("Failed to write config file")?;
    Ok(true)
}

/// Create the database file if needed and apply pending migrations
pub async fn run_migrations(paths: &SetupPaths) -> Result<()> {
    if let Some(parent) = paths.database_file.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let url = format!("sqlite:{}", paths.database_file.display());
    let db = DatabaseConnection::new(&url, 1)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;
    db.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Config;
    use crate::infrastructure::config::ConfigLoader;

    #[test]
    fn test_default_template_is_valid_config() {
        let config: Config = serde_yaml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        ConfigLoader::validate(&config).unwrap();
        assert_eq!(config.logging.log_dir.as_deref(), Some(".strategist/logs"));
        assert_eq!(config.tiers.full.min_parts_for_partial_success, 4);
    }

    #[tokio::test]
    async fn test_initialize_project_layout() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SetupPaths::at(dir.path());
        assert!(!paths.is_initialized());

        let created = create_config_dir(&paths).unwrap();
        assert_eq!(created.len(), 2);
        assert!(create_config_file(&paths, false).unwrap());
        assert!(!create_config_file(&paths, false).unwrap());
        run_migrations(&paths).await.unwrap();

        assert!(paths.is_initialized());
        assert!(create_config_dir(&paths).unwrap().is_empty());
    }
}
