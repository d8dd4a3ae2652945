use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, field, info, instrument, warn, Span};

use crate::{
    backend::JobStore,
    config::{StoreErrorPolicy, WorkerConfig},
    job::{HandlerRegistry, RetryDecision},
    observability::ObservabilityLayer,
    JobId, JobRecord, JobState, QueueError, QueueResult, WorkerId,
};

/// Where a worker is in its poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Polling,
    Claimed,
    Executing,
    Finalizing,
    Stopped,
}

/// Why an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No handler registered under the job's name
    UnknownType,
    /// The registered factory could not build a handler
    HandlerConstruction,
    /// The handler ran and failed (or panicked)
    HandlerExecution,
}

impl FailureKind {
    fn of_resolution(err: &QueueError) -> Self {
        match err {
            QueueError::UnknownType(_) => Self::UnknownType,
            QueueError::HandlerConstruction { .. } => Self::HandlerConstruction,
            _ => Self::HandlerExecution,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::UnknownType => "unknown_type",
            Self::HandlerConstruction => "handler_construction",
            Self::HandlerExecution => "handler_execution",
        };
        f.write_str(label)
    }
}

/// Result of one [`Worker::run_once`] cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was eligible
    Idle,
    /// A job was claimed and finalized into `state`
    Processed { job_id: JobId, state: JobState },
}

struct AttemptFailure {
    kind: FailureKind,
    details: String,
}

/// Claims jobs from a store and runs them one at a time
pub struct Worker {
    id: WorkerId,
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    credentials: Option<Value>,
    config: WorkerConfig,
    observability: ObservabilityLayer,
    state_tx: watch::Sender<WorkerState>,
}

impl Worker {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<HandlerRegistry>) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Idle);
        Self {
            id: WorkerId::new(),
            store,
            registry,
            credentials: None,
            config: WorkerConfig::default(),
            observability: ObservabilityLayer::new(),
            state_tx,
        }
    }

    pub fn with_id(mut self, id: WorkerId) -> Self {
        self.id = id;
        self
    }

    /// Credentials forwarded to handlers that ask for them
    pub fn with_credentials(mut self, credentials: Value) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observability(mut self, observability: ObservabilityLayer) -> Self {
        self.observability = observability;
        self
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: WorkerState) {
        self.state_tx.send_replace(state);
    }

    /// Poll once: claim, execute and finalize at most one job
    ///
    /// Handler failures are recorded on the job. Only store errors are
    /// returned, in which case a claimed job may remain reserved.
    pub async fn run_once(&self) -> QueueResult<CycleOutcome> {
        let outcome = self.cycle().await;
        self.set_state(WorkerState::Idle);
        outcome
    }

    #[instrument(
        skip(self),
        fields(worker_id = %self.id, job_id = field::Empty, job_name = field::Empty)
    )]
    async fn cycle(&self) -> QueueResult<CycleOutcome> {
        self.set_state(WorkerState::Polling);

        let Some(mut job) = self.store.claim(&self.id, Utc::now(), &self.config.queues).await? else {
            return Ok(CycleOutcome::Idle);
        };

        let span = Span::current();
        span.record("job_id", field::display(&job.id));
        span.record("job_name", job.name.as_str());

        self.set_state(WorkerState::Claimed);
        self.observability.record_job_reserved(&job.id, &self.id);
        debug!("Claimed job {} (attempt {})", job.id, job.attempts + 1);

        let started = Instant::now();
        let result = self.execute(&job).await;
        let elapsed = started.elapsed();

        self.set_state(WorkerState::Finalizing);
        let now = Utc::now();

        match result {
            Ok(()) => {
                job.succeed(now);
                self.store.save(&job).await?;

                self.observability.record_job_succeeded(&job, elapsed);
                info!("Job {} succeeded", job.id);
            }
            Err(failure) => {
                job.fail(now, failure.details);
                let decision = self.registry.retry_policy_or_default(&job.name).apply(&mut job, now);
                self.store.save(&job).await?;

                let details = job.error_details.as_deref().unwrap_or_default();
                match decision {
                    RetryDecision::Retry { next_execution_at } => {
                        self.observability.record_job_retrying(&job, next_execution_at, elapsed);
                        warn!(
                            kind = %failure.kind,
                            attempts = job.attempts,
                            "Job {} failed, will retry at {}: {}",
                            job.id, next_execution_at, details
                        );
                    }
                    RetryDecision::Dead => {
                        self.observability.record_job_dead(&job, elapsed);
                        error!(
                            kind = %failure.kind,
                            attempts = job.attempts,
                            "Job {} is dead: {}",
                            job.id, details
                        );
                    }
                }
            }
        }

        Ok(CycleOutcome::Processed {
            job_id: job.id,
            state: job.state,
        })
    }

    async fn execute(&self, job: &JobRecord) -> Result<(), AttemptFailure> {
        let handler = self.registry.create(&job.name).map_err(|e| AttemptFailure {
            kind: FailureKind::of_resolution(&e),
            details: e.to_string(),
        })?;

        self.set_state(WorkerState::Executing);

        let credentials = if handler.requires_credentials() {
            self.credentials.as_ref()
        } else {
            None
        };

        match AssertUnwindSafe(handler.handle(&job.args, credentials)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(AttemptFailure {
                kind: FailureKind::HandlerExecution,
                details: format!("{} failed: {}", job.name, e),
            }),
            Err(panic) => Err(AttemptFailure {
                kind: FailureKind::HandlerExecution,
                details: format!("{} panicked: {}", job.name, panic_message(panic.as_ref())),
            }),
        }
    }

    /// Poll until `shutdown` is cancelled
    ///
    /// Cancellation is observed between cycles, so a job in flight is always
    /// finalized. Sleeps `polling_interval` after an idle poll.
    #[instrument(skip(self, shutdown), fields(worker_id = %self.id))]
    pub async fn run(&self, shutdown: CancellationToken) -> QueueResult<()> {
        info!("Worker started for queues: {:?}", self.config.queues);

        let result = loop {
            if shutdown.is_cancelled() {
                break Ok(());
            }

            let pause = match self.run_once().await {
                Ok(CycleOutcome::Processed { .. }) => continue,
                Ok(CycleOutcome::Idle) => self.config.polling_interval,
                Err(e) => match self.config.store_error_policy {
                    StoreErrorPolicy::Retry { backoff } => {
                        warn!("Store error, retrying in {:?}: {}", backoff, e);
                        backoff
                    }
                    StoreErrorPolicy::Terminate => {
                        error!("Store error, stopping worker: {}", e);
                        break Err(e);
                    }
                },
            };

            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                _ = tokio::time::sleep(pause) => {}
            }
        };

        self.store.close().await;
        self.set_state(WorkerState::Stopped);
        info!("Worker stopped");
        result
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
