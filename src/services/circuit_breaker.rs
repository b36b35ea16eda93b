//! Circuit breaker for the shared LLM dependency.
//!
//! One instance guards every analysis run. Repeated consecutive failures
//! open the circuit; after a cool-down a single trial call is let through
//! and its outcome either closes the circuit or restarts the cool-down.
//!
//! Every operation has an `_at(now)` variant so callers (and tests) can
//! drive time explicitly.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::models::CircuitBreakerSettings;

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call.
    pub cooldown: Duration,
    /// Window for the `recent_failures` statistic.
    pub failure_window: Duration,
    /// When disabled every call is allowed and nothing is recorded.
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::seconds(60),
            failure_window: Duration::minutes(10),
            enabled: true,
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            cooldown: Duration::seconds(i64::try_from(settings.cooldown_secs).unwrap_or(i64::MAX)),
            failure_window: Duration::seconds(
                i64::try_from(settings.failure_window_secs).unwrap_or(i64::MAX),
            ),
            enabled: settings.enabled,
        }
    }
}

/// State of the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected until the cool-down elapses.
    Open,
    /// One trial request is testing whether the dependency recovered.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of asking the breaker for permission to call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitCheckResult {
    Allowed,
    /// This call is the single half-open trial.
    Trial,
    Blocked { retry_after: DateTime<Utc> },
}

impl CircuitCheckResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed | Self::Trial)
    }
}

/// Snapshot for admin visibility.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    /// Consecutive failures counted toward the threshold.
    pub failures: u32,
    /// Failures inside the configured window.
    pub recent_failures: usize,
    pub success_count: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub half_open_at: Option<DateTime<Utc>>,
    /// When an open circuit will admit its trial call.
    pub reset_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    half_open_at: Option<DateTime<Utc>>,
    reset_at: Option<DateTime<Utc>>,
    failure_times: VecDeque<DateTime<Utc>>,
    trial_in_flight: bool,
}

impl CircuitInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            opened_at: None,
            half_open_at: None,
            reset_at: None,
            failure_times: VecDeque::new(),
            trial_in_flight: false,
        }
    }

    fn open(&mut self, now: DateTime<Utc>, cooldown: Duration) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.reset_at = Some(now + cooldown);
        self.half_open_at = None;
        self.trial_in_flight = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
        self.half_open_at = None;
        self.reset_at = None;
        self.trial_in_flight = false;
    }

    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let cutoff = now - window;
        while self.failure_times.front().is_some_and(|t| *t <= cutoff) {
            self.failure_times.pop_front();
        }
    }
}

/// Shared three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(CircuitInner::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask permission for a call.
    pub async fn check(&self) -> CircuitCheckResult {
        self.check_at(Utc::now()).await
    }

    /// Ask permission for a call at `now`.
    ///
    /// An open circuit whose cool-down has elapsed moves to half-open and
    /// admits exactly one trial call; further calls are blocked until that
    /// trial reports back.
    pub async fn check_at(&self, now: DateTime<Utc>) -> CircuitCheckResult {
        if !self.config.enabled {
            return CircuitCheckResult::Allowed;
        }

        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => CircuitCheckResult::Allowed,
            CircuitState::Open => {
                let reset_at = inner.reset_at.unwrap_or(now);
                if now >= reset_at {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_at = Some(now);
                    inner.trial_in_flight = true;
                    info!("LLM circuit breaker half-open, admitting trial call");
                    CircuitCheckResult::Trial
                } else {
                    CircuitCheckResult::Blocked {
                        retry_after: reset_at,
                    }
                }
            }
            CircuitState::HalfOpen => {
                // A trial that never reported back is abandoned after one cool-down.
                let stale = inner
                    .half_open_at
                    .is_some_and(|at| now >= at + self.config.cooldown);
                if !inner.trial_in_flight || stale {
                    inner.trial_in_flight = true;
                    inner.half_open_at = Some(now);
                    CircuitCheckResult::Trial
                } else {
                    CircuitCheckResult::Blocked {
                        retry_after: inner.half_open_at.unwrap_or(now) + self.config.cooldown,
                    }
                }
            }
        }
    }

    /// Whether a new run should be gated without attempting a call.
    ///
    /// Returns the time the circuit will admit a trial when it is open and
    /// still cooling down. Does not change state.
    pub async fn gate_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.config.enabled {
            return None;
        }
        let inner = self.inner.read().await;
        match (inner.state, inner.reset_at) {
            (CircuitState::Open, Some(reset_at)) if now < reset_at => Some(reset_at),
            _ => None,
        }
    }

    pub async fn gate(&self) -> Option<DateTime<Utc>> {
        self.gate_at(Utc::now()).await
    }

    pub async fn record_success(&self) {
        self.record_success_at(Utc::now()).await;
    }

    pub async fn record_success_at(&self, _now: DateTime<Utc>) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.write().await;
        inner.success_count += 1;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.close();
                info!("LLM circuit breaker closed after successful trial call");
            }
            CircuitState::Closed => inner.failure_count = 0,
            // A call admitted before the circuit opened finished late.
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self, error: &str) {
        self.record_failure_at(error, Utc::now()).await;
    }

    pub async fn record_failure_at(&self, error: &str, now: DateTime<Utc>) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.write().await;
        inner.failure_count += 1;
        inner.last_failure_at = Some(now);
        inner.failure_times.push_back(now);
        inner.prune(now, self.config.failure_window);

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.open(now, self.config.cooldown);
                warn!(
                    failures = inner.failure_count,
                    error, "LLM circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.open(now, self.config.cooldown);
                warn!(error, "LLM circuit breaker trial call failed, reopening");
            }
            _ => {}
        }
    }

    /// Release a half-open trial whose outcome says nothing about the
    /// dependency's health (a fatal, non-counted error).
    pub async fn release_trial(&self) {
        let mut inner = self.inner.write().await;
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    pub async fn get_state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    pub async fn get_stats(&self) -> CircuitStats {
        self.get_stats_at(Utc::now()).await
    }

    pub async fn get_stats_at(&self, now: DateTime<Utc>) -> CircuitStats {
        let inner = self.inner.read().await;
        let cutoff = now - self.config.failure_window;
        CircuitStats {
            state: inner.state,
            failures: inner.failure_count,
            recent_failures: inner.failure_times.iter().filter(|t| **t > cutoff).count(),
            success_count: inner.success_count,
            last_failure_at: inner.last_failure_at,
            opened_at: inner.opened_at,
            half_open_at: inner.half_open_at,
            reset_time: inner.reset_at,
        }
    }

    /// Admin override: close the circuit and forget failures.
    pub async fn force_reset(&self) {
        let mut inner = self.inner.write().await;
        inner.close();
        inner.failure_times.clear();
        info!("LLM circuit breaker force-reset");
    }
}
