pub mod metrics;

pub use metrics::{GlobalMetrics, JobTypeMetrics, LiveMetrics, MetricsSnapshot, PerformanceMetrics};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::{JobEvent, JobId, JobRecord, WorkerId};

const EVENT_CAPACITY: usize = 10_000;

/// Type alias for boxed streams
pub type BoxStream<T> = std::pin::Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'static>>;

/// Lifecycle event fan-out plus live counters
///
/// Cheap to clone; every clone publishes to the same subscribers.
#[derive(Clone)]
pub struct ObservabilityLayer {
    event_broadcaster: broadcast::Sender<JobEvent>,
    metrics: Arc<LiveMetrics>,
}

impl ObservabilityLayer {
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            event_broadcaster,
            metrics: Arc::new(LiveMetrics::new()),
        }
    }

    fn publish(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.event_broadcaster.send(event);
    }

    pub fn record_job_enqueued(&self, job: &JobRecord) {
        self.publish(JobEvent::Enqueued {
            job_id: job.id.clone(),
            name: job.name.clone(),
            queue: job.queue.clone(),
            next_execution_at: job.next_execution_at,
            at: Utc::now(),
        });
        self.metrics.increment_jobs_enqueued(&job.name);
        debug!("Recorded job enqueued: {} ({})", job.id, job.name);
    }

    pub fn record_job_reserved(&self, job_id: &JobId, worker_id: &WorkerId) {
        self.publish(JobEvent::Reserved {
            job_id: job_id.clone(),
            worker_id: worker_id.clone(),
            at: Utc::now(),
        });
    }

    pub fn record_job_succeeded(&self, job: &JobRecord, elapsed: Duration) {
        self.publish(JobEvent::Succeeded {
            job_id: job.id.clone(),
            at: Utc::now(),
        });
        self.metrics.increment_jobs_succeeded(&job.name);
        self.metrics.record_execution_time(&job.name, elapsed);
    }

    pub fn record_job_retrying(&self, job: &JobRecord, next_execution_at: DateTime<Utc>, elapsed: Duration) {
        self.publish(JobEvent::Retrying {
            job_id: job.id.clone(),
            next_execution_at,
            error: job.error_details.clone().unwrap_or_default(),
            at: Utc::now(),
        });
        self.metrics.increment_jobs_retried(&job.name);
        self.metrics.record_execution_time(&job.name, elapsed);
    }

    pub fn record_job_dead(&self, job: &JobRecord, elapsed: Duration) {
        self.publish(JobEvent::Dead {
            job_id: job.id.clone(),
            error: job.error_details.clone().unwrap_or_default(),
            at: Utc::now(),
        });
        self.metrics.increment_jobs_dead(&job.name);
        self.metrics.record_execution_time(&job.name, elapsed);
    }

    pub fn record_reservations_released(&self, job_ids: &[JobId]) {
        let at = Utc::now();
        for job_id in job_ids {
            self.publish(JobEvent::Released { job_id: job_id.clone(), at });
        }
        self.metrics.increment_reservations_released(job_ids.len() as u64);
    }

    /// Raw receiver of lifecycle events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_broadcaster.subscribe()
    }

    /// Lifecycle events as a stream; lagged events are skipped
    pub fn event_stream(&self) -> BoxStream<JobEvent> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }

    pub fn metrics(&self) -> &LiveMetrics {
        &self.metrics
    }
}

impl Default for ObservabilityLayer {
    fn default() -> Self {
        Self::new()
    }
}
