use serde::{Deserialize, Serialize};

use super::tier::Tier;

/// Main configuration structure for Strategist
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Language model provider configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Shared circuit breaker for the LLM dependency
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Background retry queue
    #[serde(default)]
    pub retry_queue: RetryQueueConfig,

    /// Per-tier retry and partial-success policy
    #[serde(default)]
    pub tiers: TiersConfig,

    /// User and operator notifications
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".strategist/strategist.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    /// sqlx connection URL; a path that already is a URL is used as-is.
    pub fn url(&self) -> String {
        if self.path.starts_with("sqlite:") {
            self.path.clone()
        } else {
            format!("sqlite:{}", self.path)
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Number of days to retain logs
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

const fn default_retention_days() -> u32 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            retention_days: default_retention_days(),
        }
    }
}

/// Anthropic Messages API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LlmConfig {
    /// API key (can also be set via ANTHROPIC_API_KEY env var)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL for API (for testing/proxies)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Client-side request rate limit
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

const fn default_llm_timeout() -> u64 {
    300
}

const fn default_max_tokens() -> u32 {
    8192
}

const fn default_requests_per_second() -> u32 {
    5
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_llm_timeout(),
            max_tokens: default_max_tokens(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a trial call
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Window for the `recent_failures` statistic
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
}

const fn default_true() -> bool {
    true
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_cooldown_secs() -> u64 {
    60
}

const fn default_failure_window_secs() -> u64 {
    600
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            failure_window_secs: default_failure_window_secs(),
        }
    }
}

/// Retry queue processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryQueueConfig {
    /// Seconds between polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum items processed per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Retry attempts per session before giving up
    #[serde(default = "default_queue_max_retries")]
    pub max_retries: u32,

    /// First queue delay in seconds; doubles per attempt
    #[serde(default = "default_queue_base_delay_secs")]
    pub base_delay_secs: u64,

    #[serde(default = "default_queue_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Randomization applied to queue delays, 0.0 to 1.0
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

const fn default_poll_interval_secs() -> u64 {
    60
}

const fn default_batch_size() -> u32 {
    5
}

const fn default_queue_max_retries() -> u32 {
    5
}

const fn default_queue_base_delay_secs() -> u64 {
    60
}

const fn default_queue_max_delay_secs() -> u64 {
    3600
}

fn default_jitter_factor() -> f64 {
    0.2
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            max_retries: default_queue_max_retries(),
            base_delay_secs: default_queue_base_delay_secs(),
            max_delay_secs: default_queue_max_delay_secs(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

/// In-run retry and partial-success policy for one tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TierPolicy {
    /// Retries per LLM call after the first attempt
    pub max_retries: u32,

    pub base_delay_ms: u64,

    pub max_delay_ms: u64,

    /// Completed parts needed to deliver a partial report
    pub min_parts_for_partial_success: u8,
}

impl TierPolicy {
    pub fn default_for(tier: Tier) -> Self {
        match tier {
            Tier::Standard => Self {
                max_retries: 3,
                base_delay_ms: 2_000,
                max_delay_ms: 30_000,
                min_parts_for_partial_success: 1,
            },
            Tier::Medium => Self {
                max_retries: 3,
                base_delay_ms: 3_000,
                max_delay_ms: 60_000,
                min_parts_for_partial_success: 1,
            },
            Tier::Full => Self {
                max_retries: 4,
                base_delay_ms: 5_000,
                max_delay_ms: 120_000,
                min_parts_for_partial_success: 4,
            },
        }
    }

    /// Partial-success threshold as a percentage of the tier's parts.
    pub fn partial_threshold_percentage(&self, tier: Tier) -> f64 {
        f64::from(self.min_parts_for_partial_success) / f64::from(tier.part_count()) * 100.0
    }
}

/// Policies for all tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TiersConfig {
    #[serde(default = "default_standard_policy")]
    pub standard: TierPolicy,

    #[serde(default = "default_medium_policy")]
    pub medium: TierPolicy,

    #[serde(default = "default_full_policy")]
    pub full: TierPolicy,
}

fn default_standard_policy() -> TierPolicy {
    TierPolicy::default_for(Tier::Standard)
}

fn default_medium_policy() -> TierPolicy {
    TierPolicy::default_for(Tier::Medium)
}

fn default_full_policy() -> TierPolicy {
    TierPolicy::default_for(Tier::Full)
}

impl TiersConfig {
    pub fn policy(&self, tier: Tier) -> &TierPolicy {
        match tier {
            Tier::Standard => &self.standard,
            Tier::Medium => &self.medium,
            Tier::Full => &self.full,
        }
    }
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            standard: default_standard_policy(),
            medium: default_medium_policy(),
            full: default_full_policy(),
        }
    }
}

/// Notification channel configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NotificationConfig {
    /// Endpoint receiving user-facing emails as JSON; email is disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_webhook_url: Option<String>,

    /// Endpoint receiving operator alerts as JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_webhook_url: Option<String>,
}
