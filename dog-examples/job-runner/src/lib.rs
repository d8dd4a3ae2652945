pub mod jobs;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dog_jobs::prelude::*;
use dog_jobs::{LogMailer, StaleReservationReaper};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::info;

pub use jobs::CleanupReports;

/// Store, registry and shared observability for one runner process
pub struct JobRunner {
    config: QueueConfig,
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    observability: ObservabilityLayer,
}

impl JobRunner {
    pub async fn new(config: QueueConfig) -> Result<Self> {
        let store = SqliteStore::connect(&config.database_url).await?;
        store.ensure_schema().await?;
        let store: Arc<dyn JobStore> = Arc::new(store);

        let observability = ObservabilityLayer::new();
        let dispatcher = Dispatcher::new(store.clone()).with_observability(observability.clone());
        let registry = Arc::new(build_registry(dispatcher));

        info!("Registered job types: {:?}", registry.registered_types());

        Ok(Self {
            config,
            store,
            registry,
            observability,
        })
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.store.clone()).with_observability(self.observability.clone())
    }

    pub fn observability(&self) -> &ObservabilityLayer {
        &self.observability
    }

    /// Spawn the configured workers and, if enabled, the reaper
    pub async fn start(&self, shutdown: CancellationToken) -> Result<(WorkerHandle, Option<JoinHandle<()>>)> {
        let mut pool = WorkerPool::new(
            Arc::new(SqliteConnector::new(self.config.database_url.clone())),
            self.registry.clone(),
        )
        .with_config(self.config.worker.clone())
        .with_observability(self.observability.clone());

        if let Some(credentials) = smtp_credentials_from_env() {
            pool = pool.with_credentials(credentials);
        }

        let workers = pool.spawn(self.config.workers, shutdown.clone()).await?;

        let reaper = self.config.reaper.clone().map(|config| {
            let reaper = StaleReservationReaper::new(self.store.clone(), config)
                .with_observability(self.observability.clone());
            let token = shutdown.clone();
            tokio::spawn(async move { reaper.run(token).await })
        });

        Ok((workers, reaper))
    }

    /// Log every lifecycle event until `shutdown`
    pub fn spawn_event_logger(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut events = self.observability.event_stream();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.next() => match event {
                        Some(event) => info!(event = event.event_name(), job_id = %event.job_id(), "job event"),
                        None => break,
                    },
                }
            }
        })
    }

    /// Queue a handful of jobs so a fresh database has something to do
    pub async fn seed_demo_jobs(&self) -> Result<()> {
        let dispatcher = self.dispatcher();

        dispatcher
            .dispatch_as::<LogHandler>(json!({"task": "log"}), DispatchOptions::new())
            .await?;
        dispatcher
            .dispatch(
                json!({"days": 30}),
                CleanupReports::JOB_TYPE,
                DispatchOptions::new().with_wait(Duration::from_secs(5)),
            )
            .await?;
        dispatcher
            .dispatch_as::<SendEmail>(
                json!({"recipient": "ops@example.com", "subject": "Nightly report", "body": "All green"}),
                DispatchOptions::new().with_queue("mail"),
            )
            .await?;

        Ok(())
    }
}

/// Handlers and retry policies known to this runner
pub fn build_registry(dispatcher: Dispatcher) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register_queueable::<LogHandler>();
    registry.register(SendEmail::JOB_TYPE, SendEmail::factory(Arc::new(LogMailer)));
    registry.register(CleanupReports::JOB_TYPE, move || {
        Ok(Box::new(CleanupReports::new(dispatcher.clone())) as Box<dyn Handler>)
    });

    registry.register_retry_policy(
        SendEmail::JOB_TYPE,
        RetryPolicy::exponential().with_max_retries(5).with_queue("mail_retries"),
    );
    registry.register_retry_policy(
        CleanupReports::JOB_TYPE,
        RetryPolicy::fixed(Duration::from_secs(30)).with_max_retries(3),
    );

    registry
}

/// SMTP settings from `DOG_JOBS_SMTP_*`, if all are present
fn smtp_credentials_from_env() -> Option<Value> {
    let server = env::var("DOG_JOBS_SMTP_SERVER").ok()?;
    let user = env::var("DOG_JOBS_SMTP_USER").ok()?;
    let password = env::var("DOG_JOBS_SMTP_PASSWORD").ok()?;
    Some(json!({"smtp_server": server, "smtp_user": user, "smtp_password": password}))
}
