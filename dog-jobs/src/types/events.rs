use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, WorkerId};

/// Lifecycle events published for observability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// Job was persisted by the dispatcher
    Enqueued {
        job_id: JobId,
        name: String,
        queue: String,
        next_execution_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },

    /// Job was claimed by a worker
    Reserved {
        job_id: JobId,
        worker_id: WorkerId,
        at: DateTime<Utc>,
    },

    /// Job completed successfully
    Succeeded {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Job failed and will be retried
    Retrying {
        job_id: JobId,
        next_execution_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },

    /// Job was dead-lettered
    Dead {
        job_id: JobId,
        error: String,
        at: DateTime<Utc>,
    },

    /// A stale reservation was released by the reaper
    Released {
        job_id: JobId,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Reserved { .. } => "reserved",
            Self::Succeeded { .. } => "succeeded",
            Self::Retrying { .. } => "retrying",
            Self::Dead { .. } => "dead",
            Self::Released { .. } => "released",
        }
    }

    /// Get the job ID from any event
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. }
            | Self::Reserved { job_id, .. }
            | Self::Succeeded { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Dead { job_id, .. }
            | Self::Released { job_id, .. } => job_id,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Enqueued { at, .. }
            | Self::Reserved { at, .. }
            | Self::Succeeded { at, .. }
            | Self::Retrying { at, .. }
            | Self::Dead { at, .. }
            | Self::Released { at, .. } => at,
        }
    }
}
