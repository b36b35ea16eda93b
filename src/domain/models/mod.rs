pub mod config;
pub mod event;
pub mod operation;
pub mod retry_queue;
pub mod session;
pub mod tier;

pub use config::{
    CircuitBreakerSettings, Config, DatabaseConfig, LlmConfig, LoggingConfig, NotificationConfig,
    RetryQueueConfig, TierPolicy, TiersConfig,
};
pub use event::{
    replay_events, ActorType, EventType, NewOperationEvent, OperationEvent, ReplayedOperation,
};
pub use operation::{AnalysisOperation, OperationFilter, OperationState, TriggeredBy};
pub use retry_queue::{EnqueueOutcome, QueueStats, QueueStatus, RetryQueueItem};
pub use session::{AnalysisResult, AnalysisSession, ResultUpdate, SessionStatus};
pub use tier::{PartNumber, QueuePriority, Tier, MAX_PARTS};
