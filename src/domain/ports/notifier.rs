use async_trait::async_trait;
use serde::Serialize;

use crate::domain::errors::DomainResult;
use crate::domain::models::Tier;

/// Operator-facing alert
#[derive(Debug, Clone, Serialize)]
pub struct OwnerAlert {
    pub title: String,
    pub content: String,
}

impl OwnerAlert {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// User and operator notification port.
///
/// Template rendering belongs to the implementation; the orchestrator only
/// says what happened.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Whether user-facing email can be delivered at all
    fn is_email_configured(&self) -> bool;

    async fn send_completion_email(
        &self,
        email: &str,
        session_id: &str,
        tier: Tier,
        is_partial: bool,
    ) -> DomainResult<()>;

    async fn notify_analysis_failed(
        &self,
        email: &str,
        session_id: &str,
        tier: Tier,
        reason: &str,
    ) -> DomainResult<()>;

    /// The run was queued for a later retry
    async fn notify_analysis_delayed(
        &self,
        email: &str,
        session_id: &str,
        tier: Tier,
        reason: &str,
    ) -> DomainResult<()>;

    async fn notify_owner(&self, alert: OwnerAlert) -> DomainResult<()>;
}
