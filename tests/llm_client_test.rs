use mockito::{Matcher, Server};
use serde_json::json;

use strategist::domain::errors::LlmError;
use strategist::domain::models::LlmConfig;
use strategist::domain::ports::{LlmClient, LlmRequest};
use strategist::infrastructure::llm::{AnthropicClient, AnthropicClientConfig};

fn client_for(base_url: &str) -> AnthropicClient {
    let config = AnthropicClientConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        model: "claude-sonnet-4-5-20250929".to_string(),
        max_tokens: 1024,
        requests_per_second: 100, // High limit for tests
        timeout_secs: 5,
    };
    AnthropicClient::new(config).unwrap()
}

fn request() -> LlmRequest {
    LlmRequest::new("You are a strategist.", "Analyse churn.")
}

#[tokio::test]
async fn test_successful_message_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "test-api-key")
        .match_header("anthropic-version", "2023-06-01")
        .match_body(Matcher::PartialJson(json!({
            "model": "claude-sonnet-4-5-20250929",
            "max_tokens": 1024,
            "system": "You are a strategist.",
            "messages": [{"role": "user", "content": "Analyse churn."}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "msg_test123",
                "type": "message",
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "## Findings\n"},
                    {"type": "tool_use", "id": "toolu_1", "name": "noop", "input": {}},
                    {"type": "text", "text": "Churn is driven by onboarding."}
                ],
                "model": "claude-sonnet-4-5-20250929",
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 20}
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let response = client_for(&server.url()).invoke(request()).await.unwrap();

    assert_eq!(response.content, "## Findings\nChurn is driven by onboarding.");
    assert_eq!(response.token_count, Some(20));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_statuses_map_to_llm_errors() {
    let cases = [
        (429, "rate limited"),
        (500, "internal"),
        (529, "overloaded"),
        (401, "invalid x-api-key"),
        (400, "max_tokens too large"),
    ];

    for (status, body) in cases {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(status)
            .with_body(body)
            .create_async()
            .await;

        let err = client_for(&server.url()).invoke(request()).await.unwrap_err();
        match status {
            429 => assert!(matches!(err, LlmError::RateLimitExceeded)),
            500 => assert!(matches!(err, LlmError::ServerError(ref b) if b == "internal")),
            529 => assert!(matches!(err, LlmError::Overloaded)),
            401 => assert!(matches!(err, LlmError::AuthenticationFailed(_))),
            _ => assert!(matches!(err, LlmError::InvalidRequest(_))),
        }
        assert_eq!(err.is_transient(), matches!(status, 429 | 500 | 529));
    }
}

#[tokio::test]
async fn test_malformed_body_is_unknown_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/messages")
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;

    let err = client_for(&server.url()).invoke(request()).await.unwrap_err();
    assert!(matches!(err, LlmError::Unknown(_)));
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    // Nothing listens on port 1.
    let err = client_for("http://127.0.0.1:1")
        .invoke(request())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::Network(_)));
    assert!(err.is_transient());
}

#[test]
fn test_config_falls_back_to_env_key() {
    let config = LlmConfig {
        api_key: None,
        base_url: "https://proxy.example.com/".to_string(),
        ..LlmConfig::default()
    };

    temp_env::with_var("ANTHROPIC_API_KEY", Some("env-key"), || {
        let client_config = AnthropicClientConfig::from_config(&config);
        assert_eq!(client_config.api_key, "env-key");
        assert_eq!(client_config.base_url, "https://proxy.example.com");
    });

    temp_env::with_var("ANTHROPIC_API_KEY", None::<&str>, || {
        let explicit = LlmConfig {
            api_key: Some("file-key".to_string()),
            ..LlmConfig::default()
        };
        assert_eq!(AnthropicClientConfig::from_config(&explicit).api_key, "file-key");
        assert!(AnthropicClientConfig::from_config(&config).api_key.is_empty());
    });
}
