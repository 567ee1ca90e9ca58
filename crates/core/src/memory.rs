// In-memory implementations for testing
//
// These implementations keep all state in memory and record every call, making them
// suitable for:
// - Unit tests of single components
// - Scripted end-to-end batches in integration tests
// - Running the consumer loop without cloud access

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{ApiError, ApiResult};
use crate::notification::LifecycleAction;
use crate::traits::{
    ApiCredentials, ControlPlane, DrainAck, LifecycleApi, MessageSource, NotificationQueue,
    PoolWorker, QueueMessage, SecretStore, SessionToken,
};

/// Token issued by [`InMemoryControlPlane`] unless overridden
pub const DEFAULT_TEST_TOKEN: &str = "test-token";

// ============================================================================
// InMemoryControlPlane
// ============================================================================

#[derive(Debug, Default)]
struct ControlPlaneState {
    token: Option<String>,
    token_error: Option<ApiError>,
    list_error: Option<ApiError>,
    workers: Vec<PoolWorker>,
    busy: HashMap<String, bool>,
    drain_errors: HashMap<String, ApiError>,
    token_exchanges: Vec<String>,
    listed_pools: Vec<String>,
    drain_requests: Vec<(String, String)>,
}

impl ControlPlaneState {
    fn issued_token(&self) -> &str {
        self.token.as_deref().unwrap_or(DEFAULT_TEST_TOKEN)
    }

    fn check_token(&self, token: &SessionToken) -> ApiResult<()> {
        if token.as_str() == self.issued_token() {
            Ok(())
        } else {
            Err(ApiError::rejected("unauthorized"))
        }
    }
}

/// Scriptable control plane
///
/// Workers not configured with [`set_busy`](Self::set_busy) report idle.
/// Calls carrying a token other than the one it issued are rejected.
#[derive(Debug, Default, Clone)]
pub struct InMemoryControlPlane {
    state: Arc<RwLock<ControlPlaneState>>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_token(&self, token: impl Into<String>) {
        self.state.write().await.token = Some(token.into());
    }

    pub async fn fail_token_exchange(&self, error: ApiError) {
        self.state.write().await.token_error = Some(error);
    }

    pub async fn add_worker(&self, id: impl Into<String>, metadata: impl Into<String>) {
        self.state.write().await.workers.push(PoolWorker {
            id: id.into(),
            metadata: metadata.into(),
        });
    }

    /// Register a worker whose metadata points at `instance_id`
    pub async fn add_instance_worker(&self, id: impl Into<String>, instance_id: &str) {
        let metadata = serde_json::json!({ "instance_id": instance_id }).to_string();
        self.add_worker(id, metadata).await;
    }

    pub async fn fail_list_workers(&self, error: ApiError) {
        self.state.write().await.list_error = Some(error);
    }

    pub async fn set_busy(&self, worker_id: impl Into<String>, busy: bool) {
        self.state.write().await.busy.insert(worker_id.into(), busy);
    }

    pub async fn fail_drain(&self, worker_id: impl Into<String>, error: ApiError) {
        self.state
            .write()
            .await
            .drain_errors
            .insert(worker_id.into(), error);
    }

    /// Key ids seen by `exchange_token`
    pub async fn token_exchanges(&self) -> Vec<String> {
        self.state.read().await.token_exchanges.clone()
    }

    /// Pool ids passed to `list_pool_workers`
    pub async fn listed_pools(&self) -> Vec<String> {
        self.state.read().await.listed_pools.clone()
    }

    /// `(pool_id, worker_id)` for every drain request
    pub async fn drain_requests(&self) -> Vec<(String, String)> {
        self.state.read().await.drain_requests.clone()
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn exchange_token(&self, credentials: &ApiCredentials) -> ApiResult<SessionToken> {
        let mut state = self.state.write().await;
        state.token_exchanges.push(credentials.key_id.clone());
        if let Some(error) = &state.token_error {
            return Err(error.clone());
        }
        Ok(SessionToken::new(state.issued_token()))
    }

    async fn list_pool_workers(
        &self,
        pool_id: &str,
        token: &SessionToken,
    ) -> ApiResult<Vec<PoolWorker>> {
        let mut state = self.state.write().await;
        state.listed_pools.push(pool_id.to_string());
        if let Some(error) = &state.list_error {
            return Err(error.clone());
        }
        state.check_token(token)?;
        Ok(state.workers.clone())
    }

    async fn request_drain(
        &self,
        pool_id: &str,
        worker_id: &str,
        token: &SessionToken,
    ) -> ApiResult<DrainAck> {
        let mut state = self.state.write().await;
        state
            .drain_requests
            .push((pool_id.to_string(), worker_id.to_string()));
        if let Some(error) = state.drain_errors.get(worker_id) {
            return Err(error.clone());
        }
        state.check_token(token)?;
        let busy = state.busy.get(worker_id).copied().unwrap_or(false);
        Ok(DrainAck { busy })
    }
}

// ============================================================================
// InMemoryLifecycleApi
// ============================================================================

#[derive(Debug, Default)]
struct LifecycleState {
    error: Option<ApiError>,
    attempts: Vec<LifecycleAction>,
    completed: Vec<LifecycleAction>,
}

/// Records completed lifecycle actions
#[derive(Debug, Default, Clone)]
pub struct InMemoryLifecycleApi {
    state: Arc<RwLock<LifecycleState>>,
}

impl InMemoryLifecycleApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail
    pub async fn fail_with(&self, error: ApiError) {
        self.state.write().await.error = Some(error);
    }

    pub async fn clear_failure(&self) {
        self.state.write().await.error = None;
    }

    /// Every call, accepted or not
    pub async fn attempts(&self) -> Vec<LifecycleAction> {
        self.state.read().await.attempts.clone()
    }

    /// Accepted calls only
    pub async fn completed(&self) -> Vec<LifecycleAction> {
        self.state.read().await.completed.clone()
    }
}

#[async_trait]
impl LifecycleApi for InMemoryLifecycleApi {
    async fn complete_lifecycle_action(&self, action: &LifecycleAction) -> ApiResult<()> {
        let mut state = self.state.write().await;
        state.attempts.push(action.clone());
        if let Some(error) = &state.error {
            return Err(error.clone());
        }
        state.completed.push(action.clone());
        Ok(())
    }
}

// ============================================================================
// InMemoryQueue
// ============================================================================

/// A message sent through [`NotificationQueue::enqueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueuedMessage {
    pub body: String,
    pub delay_seconds: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    pending: VecDeque<QueueMessage>,
    in_flight: Vec<QueueMessage>,
    acknowledged: Vec<String>,
    enqueued: Vec<EnqueuedMessage>,
    enqueue_error: Option<ApiError>,
    receive_error: Option<ApiError>,
    acknowledge_error: Option<ApiError>,
}

impl QueueState {
    fn push(&mut self, body: String) -> QueueMessage {
        self.next_id += 1;
        let message = QueueMessage {
            message_id: format!("msg-{}", self.next_id),
            receipt_handle: format!("receipt-{}", self.next_id),
            body,
        };
        self.pending.push_back(message.clone());
        message
    }
}

/// Queue with visibility semantics: received messages stay in flight until
/// acknowledged or explicitly returned with [`expire_in_flight`](Self::expire_in_flight).
/// Delays are recorded but not enforced.
#[derive(Debug, Default, Clone)]
pub struct InMemoryQueue {
    state: Arc<RwLock<QueueState>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a message available for receive
    pub async fn push(&self, body: impl Into<String>) -> QueueMessage {
        self.state.write().await.push(body.into())
    }

    pub async fn fail_enqueue(&self, error: ApiError) {
        self.state.write().await.enqueue_error = Some(error);
    }

    pub async fn fail_receive(&self, error: ApiError) {
        self.state.write().await.receive_error = Some(error);
    }

    pub async fn fail_acknowledge(&self, error: ApiError) {
        self.state.write().await.acknowledge_error = Some(error);
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.write().await;
        state.enqueue_error = None;
        state.receive_error = None;
        state.acknowledge_error = None;
    }

    /// Messages produced by `enqueue`, in order
    pub async fn enqueued(&self) -> Vec<EnqueuedMessage> {
        self.state.read().await.enqueued.clone()
    }

    /// Message ids deleted via `acknowledge`
    pub async fn acknowledged(&self) -> Vec<String> {
        self.state.read().await.acknowledged.clone()
    }

    pub async fn pending_len(&self) -> usize {
        self.state.read().await.pending.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.read().await.in_flight.len()
    }

    /// Simulate visibility timeout expiry: unacknowledged deliveries become receivable again
    pub async fn expire_in_flight(&self) {
        let mut state = self.state.write().await;
        let expired: Vec<_> = state.in_flight.drain(..).collect();
        state.pending.extend(expired);
    }

    /// Move everything produced by `enqueue` into the receivable set, ignoring delays
    pub async fn deliver_enqueued(&self) {
        let mut state = self.state.write().await;
        let bodies: Vec<_> = state.enqueued.drain(..).map(|m| m.body).collect();
        for body in bodies {
            state.push(body);
        }
    }
}

#[async_trait]
impl NotificationQueue for InMemoryQueue {
    async fn enqueue(&self, body: String, delay_seconds: u32) -> ApiResult<()> {
        let mut state = self.state.write().await;
        if let Some(error) = &state.enqueue_error {
            return Err(error.clone());
        }
        state.enqueued.push(EnqueuedMessage {
            body,
            delay_seconds,
        });
        Ok(())
    }
}

#[async_trait]
impl MessageSource for InMemoryQueue {
    async fn receive(&self, max: usize) -> ApiResult<Vec<QueueMessage>> {
        let mut state = self.state.write().await;
        if let Some(error) = &state.receive_error {
            return Err(error.clone());
        }
        let take = max.min(state.pending.len());
        let batch: Vec<_> = state.pending.drain(..take).collect();
        state.in_flight.extend(batch.iter().cloned());
        Ok(batch)
    }

    async fn acknowledge(&self, messages: &[QueueMessage]) -> ApiResult<()> {
        let mut state = self.state.write().await;
        if let Some(error) = &state.acknowledge_error {
            return Err(error.clone());
        }
        for message in messages {
            state
                .in_flight
                .retain(|m| m.receipt_handle != message.receipt_handle);
            state.acknowledged.push(message.message_id.clone());
        }
        Ok(())
    }
}

// ============================================================================
// InMemorySecretStore
// ============================================================================

/// Secret store backed by a map
#[derive(Debug, Default, Clone)]
pub struct InMemorySecretStore {
    secrets: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, name: impl Into<String>, value: impl Into<String>) {
        self.secrets.write().await.insert(name.into(), value.into());
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn fetch_secret(&self, name: &str) -> ApiResult<String> {
        self.secrets
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::rejected(format!("parameter {} not found", name)))
    }
}
