// Drain-and-release orchestration
//
// Drains pool workers before Auto Scaling terminates their instances.
//
// Key design decisions:
// - Uses traits (ControlPlane, LifecycleApi, NotificationQueue, MessageSource) for pluggable backends
// - Token and worker directory are built once per batch and passed explicitly, never global
// - Notifications are processed strictly in order; no component waits on a busy worker,
//   the queue's delivery delay is the only timer
// - Retry state travels inside the re-enqueued message; there is no local persistence
// - Batch-level failures surface to the caller; per-notification failures never abort siblings

pub mod consumer;
pub mod directory;
pub mod dispatcher;
pub mod drain;
pub mod error;
pub mod notification;
pub mod release;
pub mod retry;
pub mod session;
pub mod telemetry;
pub mod traits;

// In-memory implementations for testing
pub mod memory;

// Re-exports for convenience
pub use consumer::{ConsumerConfig, PollOutcome, QueueConsumer};
pub use directory::WorkerDirectory;
pub use dispatcher::{
    BatchContext, BatchReport, DispatcherConfig, Disposition, DropReason, EventDispatcher,
    NotificationReport, RetryCause,
};
pub use drain::{DrainCoordinator, DrainOutcome};
pub use error::{ApiError, ApiResult, BatchError};
pub use notification::{
    LifecycleAction, MalformedNotification, ParsedNotification, TerminationNotification,
};
pub use release::{LifecycleReleaser, ReleaseOutcome};
pub use retry::{RetryDecision, RetryPolicy, RetryScheduler, RetryState, ScheduleOutcome};
pub use session::SessionProvider;
pub use traits::{
    ApiCredentials, ControlPlane, DrainAck, LifecycleApi, MessageSource, NotificationQueue,
    PoolWorker, QueueMessage, SecretStore, SessionToken,
};
