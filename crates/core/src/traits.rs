// Collaborator traits
//
// Every external system the drainer talks to sits behind one of these:
// - Production implementations live in the worker crate (GraphQL, SQS, Auto Scaling, SSM)
// - In-memory implementations in `crate::memory` for tests

use async_trait::async_trait;
use std::fmt;

use crate::error::ApiResult;
use crate::notification::LifecycleAction;

// ============================================================================
// ControlPlane - worker pool membership and drain requests
// ============================================================================

/// Long-lived API key used to obtain session tokens
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub key_id: String,
    pub secret: String,
}

impl ApiCredentials {
    pub fn new(key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("key_id", &self.key_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Short-lived bearer token for control plane calls, valid for one batch
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// A worker as listed by the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolWorker {
    pub id: String,
    /// JSON document reported by the worker at registration
    pub metadata: String,
}

/// Control plane answer to a drain request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainAck {
    /// Worker is still executing a run
    pub busy: bool,
}

/// Remote service that owns worker pools
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Exchange an API key for a session token
    async fn exchange_token(&self, credentials: &ApiCredentials) -> ApiResult<SessionToken>;

    /// List every worker currently registered in a pool
    async fn list_pool_workers(
        &self,
        pool_id: &str,
        token: &SessionToken,
    ) -> ApiResult<Vec<PoolWorker>>;

    /// Mark a worker as draining
    async fn request_drain(
        &self,
        pool_id: &str,
        worker_id: &str,
        token: &SessionToken,
    ) -> ApiResult<DrainAck>;
}

// ============================================================================
// LifecycleApi - lets a paused termination proceed
// ============================================================================

#[async_trait]
pub trait LifecycleApi: Send + Sync {
    /// Complete the lifecycle action with result `CONTINUE`
    ///
    /// `Ok` only when the provider accepted the call.
    async fn complete_lifecycle_action(&self, action: &LifecycleAction) -> ApiResult<()>;
}

// ============================================================================
// Queue - notification source and retry timer
// ============================================================================

/// One delivery received from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    /// Handle used to acknowledge this delivery
    pub receipt_handle: String,
    pub body: String,
}

/// Producing side of the notification queue
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Send a new message that becomes visible after `delay_seconds`
    async fn enqueue(&self, body: String, delay_seconds: u32) -> ApiResult<()>;
}

/// Consuming side of the notification queue
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Receive up to `max` messages; may return an empty batch
    async fn receive(&self, max: usize) -> ApiResult<Vec<QueueMessage>>;

    /// Delete deliveries so they are not redelivered
    async fn acknowledge(&self, messages: &[QueueMessage]) -> ApiResult<()>;
}

// ============================================================================
// SecretStore - long-lived secrets
// ============================================================================

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret value by name, decrypted
    async fn fetch_secret(&self, name: &str) -> ApiResult<String>;
}
