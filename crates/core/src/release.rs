// Lifecycle release
//
// Tells Auto Scaling the paused termination may continue. A rejection (action already
// completed, token expired) is an expected outcome, not an error.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::ApiError;
use crate::notification::LifecycleAction;
use crate::traits::LifecycleApi;

/// Result of completing a lifecycle action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// Provider answered and refused
    Rejected(String),
    /// Call did not get a usable answer
    Failed(ApiError),
}

impl ReleaseOutcome {
    pub fn is_released(&self) -> bool {
        matches!(self, ReleaseOutcome::Released)
    }
}

#[derive(Clone)]
pub struct LifecycleReleaser {
    lifecycle: Arc<dyn LifecycleApi>,
}

impl LifecycleReleaser {
    pub fn new(lifecycle: Arc<dyn LifecycleApi>) -> Self {
        Self { lifecycle }
    }

    /// Complete the lifecycle action with `CONTINUE`
    pub async fn release(&self, action: &LifecycleAction) -> ReleaseOutcome {
        match self.lifecycle.complete_lifecycle_action(action).await {
            Ok(()) => {
                info!(
                    instance_id = %action.instance_id,
                    hook = %action.lifecycle_hook_name,
                    "Lifecycle hook completed"
                );
                ReleaseOutcome::Released
            }
            Err(ApiError::Rejected(reason)) => {
                warn!(
                    instance_id = %action.instance_id,
                    hook = %action.lifecycle_hook_name,
                    reason = %reason,
                    "Lifecycle action was rejected"
                );
                ReleaseOutcome::Rejected(reason)
            }
            Err(e) => {
                warn!(
                    instance_id = %action.instance_id,
                    hook = %action.lifecycle_hook_name,
                    error = %e,
                    "Failed to complete lifecycle hook"
                );
                ReleaseOutcome::Failed(e)
            }
        }
    }
}
