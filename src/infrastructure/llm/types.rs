//! Wire types for the Anthropic Messages API
use serde::{Deserialize, Serialize};

use crate::domain::ports::{LlmMessage, LlmRole};

#[derive(Debug, Clone, Serialize)]
pub struct MessageRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl From<LlmMessage> for Message {
    fn from(message: LlmMessage) -> Self {
        let role = match message.role {
            LlmRole::User => "user",
            LlmRole::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: message.content,
        }
    }
}

/// Content block in a response; only text blocks carry report content
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl MessageResponse {
    /// Concatenated text of all text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_skips_non_text_blocks() {
        let response: MessageResponse = serde_json::from_str(
            r#"{
                "id": "msg_1",
                "content": [
                    {"type": "text", "text": "Hello "},
                    {"type": "tool_use", "id": "t", "name": "x", "input": {}},
                    {"type": "text", "text": "world"}
                ],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 3, "output_tokens": 5}
            }"#,
        )
        .unwrap();
        assert_eq!(response.text(), "Hello world");
        assert_eq!(response.usage.map(|u| u.output_tokens), Some(5));
    }
}
