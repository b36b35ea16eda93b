//! Notification and analytics adapters

pub mod log_notifier;
pub mod tracker;
pub mod webhook_notifier;

pub use log_notifier::LogNotifier;
pub use tracker::LogTracker;
pub use webhook_notifier::WebhookNotifier;

use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::NotificationConfig;
use crate::domain::ports::Notifier;

/// Webhook notifier when any endpoint is configured, log-only otherwise
pub fn build_notifier(config: &NotificationConfig) -> DomainResult<Arc<dyn Notifier>> {
    if config.email_webhook_url.is_some() || config.owner_webhook_url.is_some() {
        Ok(Arc::new(WebhookNotifier::new(config)?))
    } else {
        Ok(Arc::new(LogNotifier::new()))
    }
}
