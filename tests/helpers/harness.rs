//! Orchestrator wired to an in-memory database and fake adapters.

use std::sync::Arc;
use std::time::Duration;

use strategist::domain::models::{
    AnalysisResult, AnalysisSession, RetryQueueConfig, Tier, TierPolicy, TiersConfig,
};
use strategist::domain::ports::SessionRepository;
use strategist::infrastructure::database::{
    DatabaseConnection, OperationRepositoryImpl, RetryQueueRepositoryImpl, SessionRepositoryImpl,
};
use strategist::services::{
    AdminService, AnalysisOrchestrator, AnalysisStateMachine, CircuitBreaker,
    CircuitBreakerConfig, DefaultPromptProvider, OrchestratorDeps, OrchestratorSettings,
    RetryProcessorConfig, RetryQueueProcessor,
};

use super::database::{insert_session, setup_test_db};
use super::fakes::{FakeLlm, FlakyOperations, RecordingNotifier, RecordingTracker};

/// No in-run retries and no waiting, so a scripted failure ends the run.
fn fast_policy(tier: Tier) -> TierPolicy {
    TierPolicy {
        max_retries: 0,
        base_delay_ms: 1,
        max_delay_ms: 2,
        ..TierPolicy::default_for(tier)
    }
}

pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        tiers: TiersConfig {
            standard: fast_policy(Tier::Standard),
            medium: fast_policy(Tier::Medium),
            full: fast_policy(Tier::Full),
        },
        retry_queue: RetryQueueConfig {
            poll_interval_secs: 1,
            batch_size: 10,
            max_retries: 5,
            base_delay_secs: 0,
            max_delay_secs: 0,
            jitter_factor: 0.0,
        },
    }
}

pub struct TestHarness {
    pub db: DatabaseConnection,
    pub orchestrator: Arc<AnalysisOrchestrator>,
    pub llm: Arc<FakeLlm>,
    pub notifier: Arc<RecordingNotifier>,
    pub tracker: Arc<RecordingTracker>,
    pub breaker: Arc<CircuitBreaker>,
    pub operations: Arc<FlakyOperations>,
}

impl TestHarness {
    /// Breaker that never trips during a test
    pub async fn new() -> Self {
        Self::build(
            CircuitBreakerConfig {
                failure_threshold: 1_000,
                ..CircuitBreakerConfig::default()
            },
            fast_settings(),
        )
        .await
    }

    pub async fn build(breaker: CircuitBreakerConfig, settings: OrchestratorSettings) -> Self {
        let db = setup_test_db().await;
        let pool = db.pool().clone();
        let sessions = Arc::new(SessionRepositoryImpl::new(pool.clone()));
        let operations = Arc::new(FlakyOperations::new(Arc::new(OperationRepositoryImpl::new(
            pool.clone(),
        ))));
        let queue = Arc::new(RetryQueueRepositoryImpl::new(pool));

        let llm = Arc::new(FakeLlm::new());
        let notifier = Arc::new(RecordingNotifier::new(true));
        let tracker = Arc::new(RecordingTracker::default());
        let breaker = Arc::new(CircuitBreaker::new(breaker));

        let deps = OrchestratorDeps {
            sessions: sessions.clone(),
            state_machine: Arc::new(AnalysisStateMachine::new(operations.clone(), sessions)),
            queue,
            llm: llm.clone(),
            prompts: Arc::new(DefaultPromptProvider),
            breaker: breaker.clone(),
            notifier: notifier.clone(),
            tracker: tracker.clone(),
        };

        Self {
            db,
            orchestrator: Arc::new(AnalysisOrchestrator::new(deps, settings)),
            llm,
            notifier,
            tracker,
            breaker,
            operations,
        }
    }

    pub async fn session(&self, id: &str, tier: Tier, email: Option<&str>) -> AnalysisSession {
        insert_session(&self.db, id, tier, email).await
    }

    pub async fn reload(&self, id: &str) -> AnalysisSession {
        self.orchestrator
            .sessions()
            .get_session(id)
            .await
            .unwrap()
            .expect("session exists")
    }

    pub async fn result(&self, id: &str) -> AnalysisResult {
        self.orchestrator
            .sessions()
            .get_analysis_result(id)
            .await
            .unwrap()
            .unwrap_or_default()
    }

    pub fn admin(&self) -> AdminService {
        AdminService::new(Arc::clone(&self.orchestrator))
    }

    pub fn processor(&self) -> RetryQueueProcessor {
        RetryQueueProcessor::new(
            Arc::clone(&self.orchestrator),
            RetryProcessorConfig {
                poll_interval: Duration::from_millis(10),
                batch_size: 10,
                run_on_startup: true,
            },
        )
    }

    /// Poll `check` until it holds or a second passes
    pub async fn eventually<F>(&self, mut check: F) -> bool
    where
        F: FnMut() -> bool,
    {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}
