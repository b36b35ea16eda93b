use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client as ReqwestClient;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use super::types::{MessageRequest, MessageResponse};
use crate::domain::errors::LlmError;
use crate::domain::models::LlmConfig;
use crate::domain::ports::{LlmClient, LlmRequest, LlmResponse};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Configuration for the Anthropic HTTP client
#[derive(Debug, Clone)]
pub struct AnthropicClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub requests_per_second: u32,
    pub timeout_secs: u64,
}

impl AnthropicClientConfig {
    /// Build from application config, falling back to `ANTHROPIC_API_KEY`
    ///
    /// A missing key is not an error here; calls then fail with
    /// `AuthenticationFailed`, which the orchestrator treats as fatal.
    pub fn from_config(config: &LlmConfig) -> Self {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .unwrap_or_default();
        if api_key.is_empty() {
            warn!("no Anthropic API key configured; model calls will be rejected");
        }
        Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            requests_per_second: config.requests_per_second,
            timeout_secs: config.timeout_secs,
        }
    }
}

/// HTTP client for the Anthropic Messages API
///
/// Performs exactly one call per `invoke`. Requests are throttled
/// client-side; retries and circuit breaking live in the services.
pub struct AnthropicClient {
    http_client: ReqwestClient,
    config: AnthropicClientConfig,
    rate_limiter: DefaultDirectRateLimiter,
}

impl AnthropicClient {
    pub fn new(config: AnthropicClientConfig) -> Result<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .context("Failed to build HTTP client")?;

        let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rps));

        Ok(Self {
            http_client,
            config,
            rate_limiter,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn build_request(&self, request: LlmRequest) -> MessageRequest {
        MessageRequest {
            model: self.config.model.clone(),
            messages: request.messages.into_iter().map(Into::into).collect(),
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            system: request.system,
        }
    }

    async fn send_request(&self, request: &MessageRequest) -> Result<MessageResponse, LlmError> {
        let response = self
            .http_client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(LlmError::from_status(status.as_u16(), body));
        }

        response
            .json::<MessageResponse>()
            .await
            .map_err(|e| LlmError::Unknown(format!("Failed to parse API response: {e}")))
    }
}

fn map_transport_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout
    } else if err.is_connect() || err.is_request() {
        LlmError::Network(err.to_string())
    } else {
        LlmError::Unknown(err.to_string())
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    #[instrument(skip(self, request), fields(model = %self.config.model))]
    async fn invoke(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.rate_limiter.until_ready().await;

        let request = self.build_request(request);
        let started = Instant::now();
        let response = self.send_request(&request).await.inspect_err(|e| {
            warn!(error = %e, elapsed = ?started.elapsed(), "model call failed");
        })?;

        let content = response.text();
        let token_count = response.usage.map(|u| u.output_tokens);
        debug!(
            message_id = response.id.as_deref().unwrap_or_default(),
            stop_reason = response.stop_reason.as_deref().unwrap_or_default(),
            token_count,
            elapsed = ?started.elapsed(),
            "model call succeeded"
        );

        Ok(LlmResponse {
            content,
            token_count,
        })
    }
}
