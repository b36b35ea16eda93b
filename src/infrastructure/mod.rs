//! Infrastructure layer module
//!
//! Adapters that satisfy the domain ports:
//! - Database implementations (SQLite with sqlx)
//! - Anthropic Messages API client
//! - Notification and analytics sinks
//! - Configuration management
//! - Logging infrastructure
//! - Project setup

pub mod config;
pub mod database;
pub mod llm;
pub mod logging;
pub mod notify;
pub mod setup;
