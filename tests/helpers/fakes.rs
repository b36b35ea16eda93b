//! In-process stand-ins for the model, notification and analytics ports.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use strategist::domain::errors::{DomainError, DomainResult, LlmError};
use strategist::domain::models::{
    AnalysisOperation, EventType, NewOperationEvent, OperationEvent, OperationFilter,
    OperationState, Tier,
};
use strategist::domain::ports::{
    LlmClient, LlmRequest, LlmResponse, Notifier, OperationRepository, OwnerAlert, Tracker,
    TrackingEvent,
};

/// One scripted model reply
pub enum Step {
    Reply(String),
    Fail(LlmError),
    /// Block until the gate gets a permit, then reply
    Gated(Arc<Semaphore>, String),
}

/// Model client that plays back a script, then replies with generic text.
#[derive(Default)]
pub struct FakeLlm {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn reply(&self, text: &str) {
        self.push(Step::Reply(text.to_string()));
    }

    pub fn fail(&self, err: LlmError) {
        self.push(Step::Fail(err));
    }

    /// Queue a reply that waits on the returned gate
    pub fn gated(&self, text: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.push(Step::Gated(Arc::clone(&gate), text.to_string()));
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for FakeLlm {
    async fn invoke(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = request.messages.last() {
            self.prompts.lock().unwrap().push(message.content.clone());
        }
        let step = self.script.lock().unwrap().pop_front();
        let content = match step {
            Some(Step::Reply(text)) => text,
            Some(Step::Fail(err)) => return Err(err),
            Some(Step::Gated(gate, text)) => {
                let _permit = gate.acquire().await.expect("gate closed");
                text
            }
            None => format!("Generated content for call {n}"),
        };
        Ok(LlmResponse {
            content,
            token_count: Some(42),
        })
    }
}

/// A notification the orchestrator asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Completion { email: String, is_partial: bool },
    Failed { email: String },
    Delayed { email: String },
    Owner { title: String },
}

pub struct RecordingNotifier {
    email_configured: bool,
    sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    pub fn new(email_configured: bool) -> Self {
        Self {
            email_configured,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, sent: Sent) -> DomainResult<()> {
        self.sent.lock().unwrap().push(sent);
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn is_email_configured(&self) -> bool {
        self.email_configured
    }

    async fn send_completion_email(
        &self,
        email: &str,
        _session_id: &str,
        _tier: Tier,
        is_partial: bool,
    ) -> DomainResult<()> {
        self.record(Sent::Completion {
            email: email.to_string(),
            is_partial,
        })
    }

    async fn notify_analysis_failed(
        &self,
        email: &str,
        _session_id: &str,
        _tier: Tier,
        _reason: &str,
    ) -> DomainResult<()> {
        self.record(Sent::Failed {
            email: email.to_string(),
        })
    }

    async fn notify_analysis_delayed(
        &self,
        email: &str,
        _session_id: &str,
        _tier: Tier,
        _reason: &str,
    ) -> DomainResult<()> {
        self.record(Sent::Delayed {
            email: email.to_string(),
        })
    }

    async fn notify_owner(&self, alert: OwnerAlert) -> DomainResult<()> {
        self.record(Sent::Owner { title: alert.title })
    }
}

#[derive(Default)]
pub struct RecordingTracker {
    events: Mutex<Vec<TrackingEvent>>,
}

impl RecordingTracker {
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(TrackingEvent::name).collect()
    }

    /// Tracking is fire-and-forget, so poll until the event shows up.
    pub async fn wait_for(&self, name: &str) -> bool {
        for _ in 0..200 {
            if self.names().contains(&name) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}

#[async_trait]
impl Tracker for RecordingTracker {
    async fn track(&self, event: TrackingEvent) -> DomainResult<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Operation store that can be told to fail one write.
pub struct FlakyOperations {
    inner: Arc<dyn OperationRepository>,
    fail_on: Mutex<Option<EventType>>,
}

impl FlakyOperations {
    pub fn new(inner: Arc<dyn OperationRepository>) -> Self {
        Self {
            inner,
            fail_on: Mutex::new(None),
        }
    }

    /// Reject the next transition that would append an event of this type
    pub fn fail_next(&self, event_type: EventType) {
        *self.fail_on.lock().unwrap() = Some(event_type);
    }
}

#[async_trait]
impl OperationRepository for FlakyOperations {
    async fn create_operation(
        &self,
        operation: &AnalysisOperation,
        event: NewOperationEvent,
    ) -> DomainResult<OperationEvent> {
        self.inner.create_operation(operation, event).await
    }

    async fn apply_transition(
        &self,
        operation: &AnalysisOperation,
        expected: OperationState,
        event: NewOperationEvent,
    ) -> DomainResult<OperationEvent> {
        let armed = {
            let mut fail_on = self.fail_on.lock().unwrap();
            if *fail_on == Some(event.event_type) {
                fail_on.take()
            } else {
                None
            }
        };
        if armed.is_some() {
            return Err(DomainError::DatabaseError("disk I/O error".to_string()));
        }
        self.inner.apply_transition(operation, expected, event).await
    }

    async fn get_operation(&self, operation_id: &str) -> DomainResult<Option<AnalysisOperation>> {
        self.inner.get_operation(operation_id).await
    }

    async fn get_latest_for_session(
        &self,
        session_id: &str,
    ) -> DomainResult<Option<AnalysisOperation>> {
        self.inner.get_latest_for_session(session_id).await
    }

    async fn list_operations(
        &self,
        filter: &OperationFilter,
    ) -> DomainResult<Vec<AnalysisOperation>> {
        self.inner.list_operations(filter).await
    }

    async fn get_events(&self, operation_id: &str) -> DomainResult<Vec<OperationEvent>> {
        self.inner.get_events(operation_id).await
    }

    async fn list_retryable(&self, max_retries: u32) -> DomainResult<Vec<AnalysisOperation>> {
        self.inner.list_retryable(max_retries).await
    }
}
