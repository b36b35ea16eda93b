use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::LlmError;

/// Role of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    User,
    Assistant,
}

/// A single message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            content: content.into(),
        }
    }
}

/// Request for one model completion
///
/// Multi-part runs never send the full conversation history; each
/// continuation carries a condensed summary of the earlier parts instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    /// System prompt that sets the context for the conversation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    pub messages: Vec<LlmMessage>,

    /// Overrides the client's configured default when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            messages: vec![LlmMessage::user(prompt)],
            max_tokens: None,
        }
    }
}

/// Generated text plus usage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,

    /// Output tokens reported by the provider
    pub token_count: Option<u32>,
}

/// Language-model port.
///
/// Implementations perform exactly one provider call; retries and circuit
/// breaking are layered on top by the services.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}
