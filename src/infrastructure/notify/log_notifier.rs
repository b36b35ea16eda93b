use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::Tier;
use crate::domain::ports::{Notifier, OwnerAlert};

/// Notifier that only writes structured log lines
///
/// Used when no webhook is configured. Email is reported as unavailable so
/// the orchestrator skips user-facing sends.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn is_email_configured(&self) -> bool {
        false
    }

    async fn send_completion_email(
        &self,
        _email: &str,
        session_id: &str,
        tier: Tier,
        is_partial: bool,
    ) -> DomainResult<()> {
        info!(session_id, tier = %tier, is_partial, "analysis ready");
        Ok(())
    }

    async fn notify_analysis_failed(
        &self,
        _email: &str,
        session_id: &str,
        tier: Tier,
        reason: &str,
    ) -> DomainResult<()> {
        warn!(session_id, tier = %tier, reason, "analysis failed");
        Ok(())
    }

    async fn notify_analysis_delayed(
        &self,
        _email: &str,
        session_id: &str,
        tier: Tier,
        reason: &str,
    ) -> DomainResult<()> {
        info!(session_id, tier = %tier, reason, "analysis delayed");
        Ok(())
    }

    async fn notify_owner(&self, alert: OwnerAlert) -> DomainResult<()> {
        warn!(title = %alert.title, content = %alert.content, "operator alert");
        Ok(())
    }
}
