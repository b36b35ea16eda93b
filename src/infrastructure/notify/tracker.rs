use async_trait::async_trait;
use tracing::info;

use crate::domain::errors::DomainResult;
use crate::domain::ports::{Tracker, TrackingEvent};

/// Writes analytics events to the `strategist::tracking` log target
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracker;

impl LogTracker {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tracker for LogTracker {
    async fn track(&self, event: TrackingEvent) -> DomainResult<()> {
        let payload = serde_json::to_string(&event)?;
        info!(
            target: "strategist::tracking",
            event = event.name(),
            session_id = event.session_id(),
            payload = %payload,
            "tracking event"
        );
        Ok(())
    }
}
