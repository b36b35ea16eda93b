use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{NotificationConfig, Tier};
use crate::domain::ports::{Notifier, OwnerAlert};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Email payload posted to the email webhook
#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub kind: &'static str,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub session_id: String,
    pub tier: Tier,
}

/// Notifier that POSTs JSON payloads to configured endpoints
///
/// Either URL may be missing; the matching notifications are then only
/// logged.
pub struct WebhookNotifier {
    http_client: ReqwestClient,
    email_url: Option<String>,
    owner_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(config: &NotificationConfig) -> DomainResult<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| DomainError::NotificationFailed(format!("http client: {e}")))?;
        Ok(Self {
            http_client,
            email_url: config.email_webhook_url.clone(),
            owner_url: config.owner_webhook_url.clone(),
        })
    }

    async fn post<T: Serialize + Sync>(&self, url: &str, payload: &T) -> DomainResult<()> {
        let response = self
            .http_client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DomainError::NotificationFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DomainError::NotificationFailed(format!(
                "webhook returned HTTP {status}"
            )));
        }
        Ok(())
    }

    async fn send_email(&self, message: EmailMessage) -> DomainResult<()> {
        let Some(url) = &self.email_url else {
            warn!(session_id = %message.session_id, kind = message.kind, "email webhook not configured");
            return Ok(());
        };
        self.post(url, &message).await?;
        debug!(session_id = %message.session_id, kind = message.kind, "email sent");
        Ok(())
    }
}

fn completion_message(email: &str, session_id: &str, tier: Tier, is_partial: bool) -> EmailMessage {
    let (subject, body) = if is_partial {
        (
            format!("Your {} analysis is ready (partial)", tier.display_name()),
            "Most sections of your analysis are complete and available now. \
             We are working on the remaining sections and will follow up."
                .to_string(),
        )
    } else {
        (
            format!("Your {} analysis is ready", tier.display_name()),
            "Your analysis is complete and ready to read.".to_string(),
        )
    };
    EmailMessage {
        kind: "analysis_completed",
        to: email.to_string(),
        subject,
        body,
        session_id: session_id.to_string(),
        tier,
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn is_email_configured(&self) -> bool {
        self.email_url.is_some()
    }

    async fn send_completion_email(
        &self,
        email: &str,
        session_id: &str,
        tier: Tier,
        is_partial: bool,
    ) -> DomainResult<()> {
        self.send_email(completion_message(email, session_id, tier, is_partial))
            .await
    }

    async fn notify_analysis_failed(
        &self,
        email: &str,
        session_id: &str,
        tier: Tier,
        reason: &str,
    ) -> DomainResult<()> {
        self.send_email(EmailMessage {
            kind: "analysis_failed",
            to: email.to_string(),
            subject: format!("We could not finish your {} analysis", tier.display_name()),
            body: format!(
                "Something went wrong while generating your analysis: {reason}. \
                 Our team has been notified and will reach out."
            ),
            session_id: session_id.to_string(),
            tier,
        })
        .await
    }

    async fn notify_analysis_delayed(
        &self,
        email: &str,
        session_id: &str,
        tier: Tier,
        reason: &str,
    ) -> DomainResult<()> {
        self.send_email(EmailMessage {
            kind: "analysis_delayed",
            to: email.to_string(),
            subject: format!("Your {} analysis is delayed", tier.display_name()),
            body: format!(
                "Your analysis is taking longer than usual ({reason}). \
                 It is queued and will be delivered automatically."
            ),
            session_id: session_id.to_string(),
            tier,
        })
        .await
    }

    async fn notify_owner(&self, alert: OwnerAlert) -> DomainResult<()> {
        let Some(url) = &self.owner_url else {
            warn!(title = %alert.title, content = %alert.content, "operator alert");
            return Ok(());
        };
        self.post(url, &alert).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_completion_email_posts_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/email")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "kind": "analysis_completed",
                "to": "user@example.com",
                "session_id": "sess_1",
                "tier": "full"
            })))
            .with_status(202)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(&NotificationConfig {
            email_webhook_url: Some(format!("{}/email", server.url())),
            owner_webhook_url: None,
        })
        .unwrap();

        assert!(notifier.is_email_configured());
        notifier
            .send_completion_email("user@example.com", "sess_1", Tier::Full, false)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_error_surfaces() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/owner")
            .with_status(500)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(&NotificationConfig {
            email_webhook_url: None,
            owner_webhook_url: Some(format!("{}/owner", server.url())),
        })
        .unwrap();

        assert!(!notifier.is_email_configured());
        let result = notifier.notify_owner(OwnerAlert::new("down", "all broken")).await;
        assert!(matches!(result, Err(DomainError::NotificationFailed(_))));
    }

    #[test]
    fn test_partial_subject() {
        let message = completion_message("a@b.c", "s", Tier::Medium, true);
        assert!(message.subject.contains("partial"));
    }
}
