//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces the orchestration services depend on:
//! - SessionRepository: purchased sessions and their result rows
//! - OperationRepository: persisted operations and their event log
//! - RetryQueueRepository: background retry jobs
//! - LlmClient: a single language-model call
//! - PromptProvider: per-tier prompt templates
//! - Notifier: user emails and operator alerts
//! - Tracker: product analytics events

pub mod llm_client;
pub mod notifier;
pub mod operation_repository;
pub mod prompt_provider;
pub mod retry_queue_repository;
pub mod session_repository;
pub mod tracker;

pub use llm_client::{LlmClient, LlmMessage, LlmRequest, LlmResponse, LlmRole};
pub use notifier::{Notifier, OwnerAlert};
pub use operation_repository::OperationRepository;
pub use prompt_provider::{PromptProvider, TierPromptConfig};
pub use retry_queue_repository::RetryQueueRepository;
pub use session_repository::SessionRepository;
pub use tracker::{Tracker, TrackingEvent};
