// Worker directory
//
// Maps cloud instance ids to logical worker ids for one batch. Built fresh from the
// control plane every time; it goes stale as soon as pool membership changes.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, error};

use crate::error::BatchError;
use crate::traits::{ControlPlane, PoolWorker, SessionToken};

/// Key in worker metadata holding the cloud instance id
pub const METADATA_INSTANCE_ID: &str = "instance_id";

/// Read-only `instance_id -> worker_id` lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerDirectory {
    workers: HashMap<String, String>,
}

impl WorkerDirectory {
    /// Fetch the pool's workers and index them by instance id
    pub async fn load(
        control_plane: &dyn ControlPlane,
        pool_id: &str,
        token: &SessionToken,
    ) -> Result<Self, BatchError> {
        let workers = control_plane
            .list_pool_workers(pool_id, token)
            .await
            .map_err(|e| {
                error!(pool_id = %pool_id, error = %e, "Failed to list pool workers");
                BatchError::Directory(e)
            })?;

        let directory = Self::from_workers(workers);
        debug!(
            pool_id = %pool_id,
            resolvable = directory.len(),
            "Built worker directory"
        );
        Ok(directory)
    }

    /// Index workers; those without a usable instance id are left out
    pub fn from_workers(workers: impl IntoIterator<Item = PoolWorker>) -> Self {
        let workers = workers
            .into_iter()
            .filter_map(|worker| match instance_id_from_metadata(&worker.metadata) {
                Some(instance_id) => Some((instance_id, worker.id)),
                None => {
                    debug!(worker_id = %worker.id, "Worker metadata has no instance id, skipping");
                    None
                }
            })
            .collect();
        Self { workers }
    }

    /// Worker running on `instance_id`, if any
    pub fn lookup(&self, instance_id: &str) -> Option<&str> {
        self.workers.get(instance_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

fn instance_id_from_metadata(metadata: &str) -> Option<String> {
    let value: Value = serde_json::from_str(metadata).ok()?;
    match value.get(METADATA_INSTANCE_ID)?.as_str()? {
        "" => None,
        id => Some(id.to_string()),
    }
}
