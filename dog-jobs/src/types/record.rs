use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::{
    timestamp::{ensure_storable, truncate_to_micros},
    JobId, WorkerId,
};
use crate::{QueueError, QueueResult};

/// Default lane for newly dispatched jobs
pub const DEFAULT_QUEUE: &str = "default";

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Dispatched and never attempted
    Waiting,

    /// Held by a worker (persisted for compatibility; claims are tracked via `reserved_by`)
    Reserved,

    /// Last attempt succeeded (terminal)
    Succeeded,

    /// Last attempt failed, eligible again once `next_execution_at` elapses
    Failed,

    /// Retry budget exhausted or explicitly dead-lettered (terminal)
    Dead,
}

impl JobState {
    /// Get the persisted name of the state
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Reserved => "reserved",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }

    /// Terminal states are never claimed again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Dead)
    }

    /// States a worker may claim from
    pub fn is_claimable(self) -> bool {
        matches!(self, Self::Waiting | Self::Failed)
    }

    pub fn all() -> &'static [JobState] {
        &[Self::Waiting, Self::Reserved, Self::Succeeded, Self::Failed, Self::Dead]
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::Waiting
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "reserved" => Ok(Self::Reserved),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            other => Err(QueueError::Serialization(format!("unknown job state: {}", other))),
        }
    }
}

/// Durable record of one unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier
    pub id: JobId,

    /// Job type, resolves the handler
    pub name: String,

    /// Lane name; retry policies may reroute it
    pub queue: String,

    /// Handler arguments, opaque to the queue
    pub args: Value,

    /// Finished execution attempts so far
    pub attempts: u32,

    pub created_at: DateTime<Utc>,

    /// Not claimable before this instant when set
    pub next_execution_at: Option<DateTime<Utc>>,

    pub last_executed_at: Option<DateTime<Utc>>,

    pub state: JobState,

    /// Present only while the last attempt failed
    pub error_details: Option<String>,

    /// Worker currently holding the job
    pub reserved_by: Option<WorkerId>,

    /// When the current reservation was taken
    pub reserved_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a fresh waiting job
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            queue: DEFAULT_QUEUE.to_string(),
            args,
            attempts: 0,
            created_at: truncate_to_micros(Utc::now()),
            next_execution_at: None,
            last_executed_at: None,
            state: JobState::Waiting,
            error_details: None,
            reserved_by: None,
            reserved_at: None,
        }
    }

    /// Claim eligibility at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.reserved_by.is_none()
            && self.state.is_claimable()
            && self.next_execution_at.map_or(true, |at| at <= now)
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved_by.is_some()
    }

    /// Take the reservation for `worker`
    pub fn reserve(&mut self, worker: &WorkerId, now: DateTime<Utc>) {
        self.reserved_by = Some(worker.clone());
        self.reserved_at = Some(truncate_to_micros(now));
    }

    /// Drop the reservation without touching anything else
    pub fn release(&mut self) {
        self.reserved_by = None;
        self.reserved_at = None;
    }

    /// Close an attempt: release, stamp and count it
    pub fn finish_attempt(&mut self, now: DateTime<Utc>) {
        self.release();
        self.last_executed_at = Some(truncate_to_micros(now));
        self.attempts += 1;
    }

    /// Finalize a successful attempt
    pub fn succeed(&mut self, now: DateTime<Utc>) {
        self.finish_attempt(now);
        self.state = JobState::Succeeded;
        self.error_details = None;
    }

    /// Finalize a failed attempt; the retry policy decides what comes next
    pub fn fail(&mut self, now: DateTime<Utc>, error_details: String) {
        self.finish_attempt(now);
        self.state = JobState::Failed;
        self.error_details = Some(error_details);
    }

    /// Zero-based number of the attempt that just finished
    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Every timestamp must have a four-digit year to be persisted
    pub fn ensure_storable(&self) -> QueueResult<()> {
        ensure_storable(self.created_at)?;
        for ts in [self.next_execution_at, self.last_executed_at, self.reserved_at]
            .into_iter()
            .flatten()
        {
            ensure_storable(ts)?;
        }
        Ok(())
    }
}
