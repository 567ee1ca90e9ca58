// Drain requests
//
// A single check, not a wait loop: a busy worker is reported straight back and the
// caller pushes the wait into the queue's retry delay.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::ApiError;
use crate::traits::{ControlPlane, SessionToken};

/// Result of one drain attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Worker is draining and idle
    Drained,
    /// Worker accepted the drain but is still running work
    StillBusy,
    /// The request itself failed
    Failed(ApiError),
}

impl DrainOutcome {
    pub fn is_drained(&self) -> bool {
        matches!(self, DrainOutcome::Drained)
    }
}

/// Asks the control plane to drain one worker
#[derive(Clone)]
pub struct DrainCoordinator {
    control_plane: Arc<dyn ControlPlane>,
    pool_id: String,
}

impl DrainCoordinator {
    pub fn new(control_plane: Arc<dyn ControlPlane>, pool_id: impl Into<String>) -> Self {
        Self {
            control_plane,
            pool_id: pool_id.into(),
        }
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    /// Mark `worker_id` as draining and report whether it is idle
    ///
    /// Safe to repeat: draining an already drained worker reports `Drained`.
    pub async fn drain(&self, worker_id: &str, token: &SessionToken) -> DrainOutcome {
        info!(worker_id = %worker_id, pool_id = %self.pool_id, "Draining worker");

        match self
            .control_plane
            .request_drain(&self.pool_id, worker_id, token)
            .await
        {
            Ok(ack) if ack.busy => {
                info!(worker_id = %worker_id, "Worker is still busy after draining");
                DrainOutcome::StillBusy
            }
            Ok(_) => {
                info!(worker_id = %worker_id, "Worker drained");
                DrainOutcome::Drained
            }
            Err(e) => {
                warn!(worker_id = %worker_id, error = %e, "Drain request failed");
                DrainOutcome::Failed(e)
            }
        }
    }
}
