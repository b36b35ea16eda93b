//! Strategist - multi-part LLM analysis orchestration
//!
//! Generates strategy reports of one, two or six sequential parts per
//! purchased tier, persisting every step so runs survive failures.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): orchestration, state machine, circuit
//!   breaker, retries and the retry queue processor
//! - **Infrastructure Layer** (`infrastructure`): `SQLite`, Anthropic API,
//!   notifications, configuration and logging adapters
//! - **CLI Layer** (`cli`): the `strategist` command-line interface

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult, LlmError};
pub use domain::models::{
    AnalysisOperation, AnalysisSession, Config, OperationState, SessionStatus, Tier,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    AdminService, AnalysisOrchestrator, AnalysisOutcome, AnalysisRequest, RetryQueueProcessor,
};
