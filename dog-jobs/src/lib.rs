//! # dog-jobs: Persistent Background Jobs
//!
//! **Durable job queue with atomic claims, named handlers and retry policies**
//!
//! Jobs are rows in a store. Dispatchers write them, workers claim them one at
//! a time through a single atomic store operation, run the handler registered
//! under the job's name and persist the outcome.
//!
//! ## Features
//!
//! - **Atomic Claims**: one `UPDATE ... RETURNING` per claim, so any number of
//!   workers and processes can share one SQLite database
//! - **Named Handlers**: `HandlerRegistry` maps job names to handler factories,
//!   built once at startup and shared behind an `Arc`
//! - **Retry Policies**: fixed or exponential backoff, custom blocks, retry
//!   budgets with dead-lettering, and queue rerouting for retries
//! - **Scheduling**: `wait` or `at` on dispatch defers a job
//! - **Graceful Shutdown**: workers observe a `CancellationToken` between jobs,
//!   an in-flight job is always finalized
//! - **Observability**: `tracing` spans per cycle, a `JobEvent` stream and live
//!   counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dog_jobs::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> QueueResult<()> {
//!     let store = SqliteStore::connect("sqlite://jobs.db").await?;
//!     store.ensure_schema().await?;
//!
//!     let mut registry = HandlerRegistry::new();
//!     registry.register_queueable::<LogHandler>();
//!     registry.register_retry_policy("LogQueueable", RetryPolicy::exponential().with_max_retries(5));
//!
//!     let dispatcher = Dispatcher::new(Arc::new(store));
//!     dispatcher
//!         .dispatch(json!({"task": "log"}), "LogQueueable", DispatchOptions::new())
//!         .await?;
//!
//!     let shutdown = CancellationToken::new();
//!     let pool = WorkerPool::new(Arc::new(SqliteConnector::new("sqlite://jobs.db")), Arc::new(registry));
//!     let workers = pool.spawn(4, shutdown.clone()).await?;
//!
//!     let _ = tokio::signal::ctrl_c().await;
//!     workers.shutdown().await
//! }
//! ```

pub mod types;
pub mod error;
pub mod job;
pub mod backend;
pub mod dispatcher;
pub mod worker;
pub mod pool;
pub mod reaper;
pub mod observability;
pub mod config;

// Core API exports
pub use types::{JobEvent, JobId, JobRecord, JobState, WorkerId, DEFAULT_QUEUE};
pub use error::{JobError, QueueError, QueueResult};
pub use job::{
    builtin::{EmailMessage, LogHandler, LogMailer, Mailer, SendEmail, SmtpCredentials},
    Handler, HandlerFactory, HandlerRegistry, Queueable, RetryBlock, RetryDecision, RetryInterval, RetryPolicy,
};
pub use backend::{JobStore, StoreConnector};
pub use dispatcher::{DispatchOptions, Dispatcher};
pub use worker::{CycleOutcome, FailureKind, Worker, WorkerState};
pub use pool::{WorkerHandle, WorkerPool};
pub use reaper::StaleReservationReaper;
pub use config::{QueueConfig, ReaperConfig, StoreErrorPolicy, WorkerConfig};

// Observability exports
pub use observability::{LiveMetrics, ObservabilityLayer};

// Backend implementations
#[cfg(feature = "memory")]
pub use backend::memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use backend::sqlite::{SqliteConnector, SqliteStore};

/// Everything needed to define handlers, dispatch jobs and run workers
pub mod prelude {
    pub use crate::{
        DispatchOptions, Dispatcher, Handler, HandlerRegistry, Queueable, RetryInterval, RetryPolicy,
    };

    pub use crate::{JobError, JobId, JobRecord, JobState, QueueError, QueueResult};

    pub use crate::{JobStore, StoreConnector, WorkerHandle, WorkerPool};

    pub use crate::{LogHandler, SendEmail};

    pub use crate::{QueueConfig, WorkerConfig};

    pub use crate::ObservabilityLayer;

    #[cfg(feature = "memory")]
    pub use crate::MemoryStore;

    #[cfg(feature = "sqlite")]
    pub use crate::{SqliteConnector, SqliteStore};

    pub use async_trait::async_trait;
    pub use tokio_util::sync::CancellationToken;
}
