#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{JobId, JobRecord, JobState, QueueResult, WorkerId};

/// Storage primitives the dispatcher, workers and reaper are built on
///
/// Implementations must make [`JobStore::claim`] indivisible: two concurrent
/// claims never return the same job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job, failing with [`QueueError::DuplicateJob`] if the id is taken
    ///
    /// [`QueueError::DuplicateJob`]: crate::QueueError::DuplicateJob
    async fn insert(&self, job: &JobRecord) -> QueueResult<()>;

    /// Insert or overwrite a job by id
    async fn save(&self, job: &JobRecord) -> QueueResult<()>;

    /// Reserve the oldest eligible job for `worker_id` and return it
    ///
    /// Eligible means unreserved, `waiting` or `failed`, and due at `now`.
    /// An empty `queues` slice matches every lane.
    async fn claim(
        &self,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
        queues: &[String],
    ) -> QueueResult<Option<JobRecord>>;

    /// Fetch a job by id
    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// Clear reservations taken before `reserved_before`, returning the affected ids
    async fn release_stale(&self, reserved_before: DateTime<Utc>) -> QueueResult<Vec<JobId>>;

    /// Number of jobs per persisted state
    async fn count_by_state(&self) -> QueueResult<HashMap<JobState, u64>>;

    /// Release the underlying resources
    async fn close(&self) {}
}

/// Opens a store handle; every worker gets its own
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> QueueResult<Arc<dyn JobStore>>;
}

/// Hand out clones of one shared store
#[async_trait]
impl StoreConnector for Arc<dyn JobStore> {
    async fn connect(&self) -> QueueResult<Arc<dyn JobStore>> {
        Ok(self.clone())
    }
}
