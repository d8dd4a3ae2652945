use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::{
    backend::StoreConnector, config::WorkerConfig, job::HandlerRegistry, observability::ObservabilityLayer,
    worker::Worker, QueueError, QueueResult, WorkerId,
};

/// Handle for managing the lifecycle of spawned workers
pub struct WorkerHandle {
    shutdown: CancellationToken,
    workers: Vec<(WorkerId, JoinHandle<QueueResult<()>>)>,
}

impl WorkerHandle {
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Token observed by every worker; cancelling it requests shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Gracefully shutdown: cancel, then wait for in-flight jobs to finalize
    ///
    /// Returns the first worker error, if any.
    pub async fn shutdown(self) -> QueueResult<()> {
        self.shutdown.cancel();
        self.join().await
    }

    /// Wait for every worker to exit without requesting shutdown
    pub async fn join(self) -> QueueResult<()> {
        let (ids, handles): (Vec<_>, Vec<_>) = self.workers.into_iter().unzip();
        let results = futures::future::join_all(handles).await;

        let mut first_error = None;
        for (id, result) in ids.into_iter().zip(results) {
            let outcome = result
                .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))
                .and_then(|r| r);
            if let Err(e) = outcome {
                error!("Worker {} exited with error: {}", id, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Spawns independent workers, each with its own store handle
pub struct WorkerPool {
    connector: Arc<dyn StoreConnector>,
    registry: Arc<HandlerRegistry>,
    credentials: Option<Value>,
    config: WorkerConfig,
    observability: ObservabilityLayer,
}

impl WorkerPool {
    pub fn new(connector: Arc<dyn StoreConnector>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            connector,
            registry,
            credentials: None,
            config: WorkerConfig::default(),
            observability: ObservabilityLayer::new(),
        }
    }

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

    /// Connect and start `count` workers sharing `shutdown`
    ///
    /// Fails without starting anything if any store handle cannot be opened.
    #[instrument(skip(self, shutdown))]
    pub async fn spawn(&self, count: usize, shutdown: CancellationToken) -> QueueResult<WorkerHandle> {
        let mut workers = Vec::with_capacity(count);
        for _ in 0..count {
            let store = self.connector.connect().await?;
            let mut worker = Worker::new(store, self.registry.clone())
                .with_config(self.config.clone())
                .with_observability(self.observability.clone());
            if let Some(credentials) = &self.credentials {
                worker = worker.with_credentials(credentials.clone());
            }
            workers.push(worker);
        }

        let handles = workers
            .into_iter()
            .map(|worker| {
                let id = worker.id().clone();
                let token = shutdown.clone();
                let handle = tokio::spawn(async move { worker.run(token).await });
                (id, handle)
            })
            .collect::<Vec<_>>();

        info!("Started {} workers for queues: {:?}", handles.len(), self.config.queues);

        Ok(WorkerHandle {
            shutdown,
            workers: handles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::JobStore, job::builtin::LogHandler, JobRecord, JobState, MemoryStore};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_drains_jobs_and_shuts_down() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for n in 0..10 {
            let job = JobRecord::new("LogQueueable", json!({ "n": n }));
            store.save(&job).await.unwrap();
            ids.push(job.id);
        }

        let mut registry = HandlerRegistry::new();
        registry.register_queueable::<LogHandler>();

        let pool = WorkerPool::new(Arc::new(store.clone()), Arc::new(registry))
            .with_config(WorkerConfig::default().with_polling_interval(Duration::from_millis(10)));
        let handle = pool.spawn(3, CancellationToken::new()).await.unwrap();
        assert_eq!(handle.len(), 3);

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let counts = store.count_by_state().await.unwrap();
                if counts.get(&JobState::Succeeded) == Some(&10) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        handle.shutdown().await.unwrap();

        for id in ids {
            let job = store.get(&id).await.unwrap().unwrap();
            assert_eq!(job.attempts, 1);
        }
    }
}
