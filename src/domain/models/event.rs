//! Append-only audit events for analysis operations.
//!
//! The ordered event list of an operation is the source of truth for its
//! state history: replaying `previous_state -> new_state` pairs must land on
//! the persisted row's current state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::operation::OperationState;
use super::tier::{PartNumber, Tier};
use crate::domain::errors::DomainError;

/// Kind of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    OperationStarted,
    PartStarted,
    PartCompleted,
    PartFailed,
    OperationCompleted,
    OperationFailed,
    OperationPaused,
    OperationResumed,
    OperationCancelled,
    OperationRetried,
    AdminIntervention,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OperationStarted => "operation_started",
            Self::PartStarted => "part_started",
            Self::PartCompleted => "part_completed",
            Self::PartFailed => "part_failed",
            Self::OperationCompleted => "operation_completed",
            Self::OperationFailed => "operation_failed",
            Self::OperationPaused => "operation_paused",
            Self::OperationResumed => "operation_resumed",
            Self::OperationCancelled => "operation_cancelled",
            Self::OperationRetried => "operation_retried",
            Self::AdminIntervention => "admin_intervention",
        }
    }

    pub fn all() -> [EventType; 11] {
        [
            Self::OperationStarted,
            Self::PartStarted,
            Self::PartCompleted,
            Self::PartFailed,
            Self::OperationCompleted,
            Self::OperationFailed,
            Self::OperationPaused,
            Self::OperationResumed,
            Self::OperationCancelled,
            Self::OperationRetried,
            Self::AdminIntervention,
        ]
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::ValidationFailed(format!("unknown event type: {s}")))
    }
}

/// Kind of actor that caused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    System,
    Admin,
    RetryQueue,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Admin => "admin",
            Self::RetryQueue => "retry_queue",
        }
    }
}

impl FromStr for ActorType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            "admin" => Ok(Self::Admin),
            "retry_queue" => Ok(Self::RetryQueue),
            other => Err(DomainError::ValidationFailed(format!("unknown actor type: {other}"))),
        }
    }
}

/// A persisted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationEvent {
    /// Monotonic row id; defines replay order.
    pub id: i64,
    pub operation_id: String,
    pub session_id: String,
    pub event_type: EventType,
    pub part_number: Option<u8>,
    /// `None` only for the event that created the operation.
    pub previous_state: Option<OperationState>,
    pub new_state: OperationState,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,
    pub token_count: Option<u32>,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// An event that has not been written yet.
#[derive(Debug, Clone)]
pub struct NewOperationEvent {
    pub event_type: EventType,
    pub part_number: Option<u8>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,
    pub token_count: Option<u32>,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub metadata: Value,
}

impl NewOperationEvent {
    pub fn new(event_type: EventType, actor_type: ActorType) -> Self {
        Self {
            event_type,
            part_number: None,
            error_code: None,
            error_message: None,
            duration_ms: None,
            token_count: None,
            actor_type,
            actor_id: None,
            metadata: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn part(mut self, part: PartNumber) -> Self {
        self.part_number = Some(part.get());
        self
    }

    pub fn error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn token_count(mut self, tokens: u32) -> Self {
        self.token_count = Some(tokens);
        self
    }

    pub fn actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Attach a metadata key. Non-object metadata is replaced.
    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !self.metadata.is_object() {
            self.metadata = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(ref mut map) = self.metadata {
            map.insert(key.to_string(), value.into());
        }
        self
    }
}

/// Operation state reconstructed from its events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedOperation {
    pub state: OperationState,
    pub completed_parts: u8,
}

/// Replay an ordered event list.
///
/// Fails if an event's `previous_state` does not match the state produced
/// by the events before it, which indicates a corrupted log.
pub fn replay_events(events: &[OperationEvent]) -> Result<ReplayedOperation, DomainError> {
    let mut state: Option<OperationState> = None;
    let mut completed_parts: u8 = 0;
    let mut total_parts: Option<u8> = None;
    let mut seen_parts = [false; super::tier::MAX_PARTS];

    for event in events {
        if event.previous_state != state {
            return Err(DomainError::ValidationFailed(format!(
                "event {} ({}) expected previous state {:?} but replay is at {:?}",
                event.id, event.event_type, event.previous_state, state
            )));
        }
        if let Some(prev) = event.previous_state {
            let all_parts_carried = total_parts.is_some_and(|total| completed_parts >= total);
            if prev != event.new_state && !prev.permits(event.new_state, all_parts_carried) {
                return Err(DomainError::InvalidStateTransition {
                    from: prev.to_string(),
                    to: event.new_state.to_string(),
                    reason: format!("event {} is not a legal transition", event.id),
                });
            }
        }

        match event.event_type {
            EventType::OperationStarted => {
                completed_parts = event
                    .metadata
                    .get("initial_completed_parts")
                    .and_then(Value::as_u64)
                    .and_then(|n| u8::try_from(n).ok())
                    .unwrap_or(0);
                total_parts = event
                    .metadata
                    .get("total_parts")
                    .and_then(Value::as_u64)
                    .and_then(|n| u8::try_from(n).ok())
                    .or_else(|| {
                        event
                            .metadata
                            .get("tier")
                            .and_then(Value::as_str)
                            .and_then(|tier| tier.parse::<Tier>().ok())
                            .map(|tier| tier.part_count())
                    });
                for slot in seen_parts.iter_mut().take(usize::from(completed_parts)) {
                    *slot = true;
                }
            }
            EventType::PartCompleted => {
                if let Some(part) = event.part_number.and_then(|n| PartNumber::new(n).ok()) {
                    if !seen_parts[part.index()] {
                        seen_parts[part.index()] = true;
                        completed_parts += 1;
                    }
                }
            }
            _ => {}
        }

        state = Some(event.new_state);
    }

    state
        .map(|state| ReplayedOperation { state, completed_parts })
        .ok_or_else(|| DomainError::ValidationFailed("no events to replay".to_string()))
}
