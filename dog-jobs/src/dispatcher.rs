use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::{
    backend::JobStore,
    job::Queueable,
    observability::ObservabilityLayer,
    types::timestamp::{is_storable, truncate_to_micros},
    JobId, JobRecord, QueueError, QueueResult,
};

/// Fresh ids tried before giving up on a run of collisions
const MAX_ID_ATTEMPTS: usize = 5;

/// Scheduling and routing options for a new job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Relative delay; takes precedence over `at`
    pub wait: Option<Duration>,
    /// Absolute "not before" instant
    pub at: Option<DateTime<Utc>>,
    /// Lane override
    pub queue: Option<String>,
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    pub fn with_at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Resolve the first claimable instant, if any
    ///
    /// Instants outside years 0000..=9999 are rejected.
    fn next_execution_at(&self, now: DateTime<Utc>) -> QueueResult<Option<DateTime<Utc>>> {
        let at = match self.wait.filter(|w| !w.is_zero()) {
            Some(wait) => {
                let wait = TimeDelta::from_std(wait)
                    .map_err(|e| QueueError::Config(format!("dispatch wait out of range: {}", e)))?;
                now.checked_add_signed(wait)
                    .ok_or_else(|| QueueError::Config("dispatch wait out of range".to_string()))?
            }
            None => match self.at {
                Some(at) => at,
                None => return Ok(None),
            },
        };

        let at = truncate_to_micros(at);
        if !is_storable(at) {
            return Err(QueueError::Config(format!(
                "dispatch time {} is outside years 0000..=9999",
                at
            )));
        }
        Ok(Some(at))
    }
}

/// Creates and persists new jobs
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    observability: ObservabilityLayer,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            observability: ObservabilityLayer::new(),
        }
    }

    pub fn with_observability(mut self, observability: ObservabilityLayer) -> Self {
        self.observability = observability;
        self
    }

    /// Enqueue a job of type `name`
    ///
    /// The handler need not be registered yet; resolution happens on the worker.
    #[instrument(skip(self, args, options), fields(job_name = %name))]
    pub async fn dispatch(&self, args: Value, name: &str, options: DispatchOptions) -> QueueResult<JobId> {
        let mut job = JobRecord::new(name, args);
        job.next_execution_at = options.next_execution_at(job.created_at)?;
        if let Some(queue) = options.queue.filter(|q| !q.is_empty()) {
            job.queue = queue;
        }

        let mut attempt = 1;
        loop {
            match self.store.insert(&job).await {
                Err(QueueError::DuplicateJob(id)) if attempt < MAX_ID_ATTEMPTS => {
                    warn!("Job id {} already taken, generating another", id);
                    job.id = JobId::new();
                    attempt += 1;
                }
                result => break result?,
            }
        }

        self.observability.record_job_enqueued(&job);
        info!("Enqueued job {} of type {}", job.id, name);
        Ok(job.id)
    }

    /// Enqueue a job for a [`Queueable`] handler
    pub async fn dispatch_as<Q: Queueable>(&self, args: Value, options: DispatchOptions) -> QueueResult<JobId> {
        self.dispatch(args, Q::JOB_TYPE, options).await
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn observability(&self) -> &ObservabilityLayer {
        &self.observability
    }
}
