//! Wiring of adapters into the orchestration services for CLI commands.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::domain::models::Config;
use crate::domain::ports::LlmClient;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::database::{
    DatabaseConnection, OperationRepositoryImpl, RetryQueueRepositoryImpl, SessionRepositoryImpl,
};
use crate::infrastructure::llm::{AnthropicClient, AnthropicClientConfig};
use crate::infrastructure::notify::{build_notifier, LogTracker};
use crate::services::{
    AdminService, AnalysisOrchestrator, AnalysisStateMachine, CircuitBreaker,
    CircuitBreakerConfig, DefaultPromptProvider, OrchestratorDeps, OrchestratorSettings,
};

/// Everything a command needs, built once per invocation
pub struct AppContext {
    pub config: Config,
    pub db: DatabaseConnection,
    pub orchestrator: Arc<AnalysisOrchestrator>,
}

impl AppContext {
    /// Load configuration from `.strategist/` and connect
    pub async fn load() -> Result<Self> {
        let config = ConfigLoader::load().context("Failed to load configuration")?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: Config) -> Result<Self> {
        let llm = AnthropicClient::new(AnthropicClientConfig::from_config(&config.llm))
            .context("Failed to create Anthropic client")?;
        Self::with_llm(config, Arc::new(llm)).await
    }

    /// Build the context around a given model client
    pub async fn with_llm(config: Config, llm: Arc<dyn LlmClient>) -> Result<Self> {
        let db = DatabaseConnection::from_config(&config.database)
            .await
            .context("Failed to connect to database")?;
        db.migrate().await.context("Failed to run migrations")?;

        let pool = db.pool().clone();
        let sessions = Arc::new(SessionRepositoryImpl::new(pool.clone()));
        let operations = Arc::new(OperationRepositoryImpl::new(pool.clone()));
        let queue = Arc::new(RetryQueueRepositoryImpl::new(pool));

        let deps = OrchestratorDeps {
            sessions: sessions.clone(),
            state_machine: Arc::new(AnalysisStateMachine::new(operations, sessions)),
            queue,
            llm,
            prompts: Arc::new(DefaultPromptProvider),
            breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig::from(
                &config.circuit_breaker,
            ))),
            notifier: build_notifier(&config.notifications)
                .context("Failed to create notifier")?,
            tracker: Arc::new(LogTracker::new()),
        };
        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            deps,
            OrchestratorSettings::from(&config),
        ));

        Ok(Self {
            config,
            db,
            orchestrator,
        })
    }

    pub fn admin(&self) -> AdminService {
        AdminService::new(Arc::clone(&self.orchestrator))
    }
}
