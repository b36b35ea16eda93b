//! Orchestration services.
//!
//! Everything here depends only on the domain ports; adapters are wired in
//! by the CLI or by tests.

pub mod admin;
pub mod best_effort;
pub mod circuit_breaker;
pub mod error_classifier;
pub mod handoff;
pub mod orchestrator;
pub mod partial_results;
pub mod retry;
pub mod retry_queue_processor;
pub mod run_guard;
pub mod state_machine;
pub mod tier_prompts;

pub use admin::{AdminService, RestartedRun, SystemOverview};
pub use best_effort::spawn_best_effort;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitCheckResult, CircuitState, CircuitStats,
};
pub use error_classifier::{
    classify_error, classify_llm_error, AnalysisError, ClassifiedError, ErrorCategory,
};
pub use handoff::build_handoff_state;
pub use orchestrator::{
    estimate_completion, AnalysisOrchestrator, AnalysisOutcome, AnalysisRequest,
    OrchestratorDeps, OrchestratorSettings, ResumeConfig,
};
pub use partial_results::PartialResultsManager;
pub use retry::{backoff_delay, RetryPolicy, DEFAULT_JITTER};
pub use retry_queue_processor::{
    PollReport, ProcessorHandle, ProcessorStatus, RetryProcessorConfig, RetryQueueProcessor,
};
pub use run_guard::{RunGuard, RunRegistry};
pub use state_machine::{AnalysisStateMachine, OperationDetails, StepResult};
pub use tier_prompts::DefaultPromptProvider;
