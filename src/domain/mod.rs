//! Domain layer for the Strategist analysis orchestrator
//!
//! Core models, error types and the port traits that infrastructure
//! adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult, LlmError};
