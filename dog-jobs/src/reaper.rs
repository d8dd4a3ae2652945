use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{backend::JobStore, config::ReaperConfig, observability::ObservabilityLayer, JobId, QueueResult};

/// Shortest period the reaper will tick at
const MIN_REAPER_INTERVAL: Duration = Duration::from_millis(1);

/// Releases reservations held by workers that died mid-job
///
/// Only `reserved_by`/`reserved_at` are cleared; state, attempts and schedule
/// are left as they were, so the job is simply claimable again.
pub struct StaleReservationReaper {
    store: Arc<dyn JobStore>,
    config: ReaperConfig,
    observability: ObservabilityLayer,
}

impl StaleReservationReaper {
    pub fn new(store: Arc<dyn JobStore>, config: ReaperConfig) -> Self {
        Self {
            store,
            config,
            observability: ObservabilityLayer::new(),
        }
    }

    pub fn with_observability(mut self, observability: ObservabilityLayer) -> Self {
        self.observability = observability;
        self
    }

    /// Run one reaper cycle
    pub async fn reap_once(&self) -> QueueResult<Vec<JobId>> {
        let timeout = TimeDelta::from_std(self.config.reservation_timeout).unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now().checked_sub_signed(timeout).unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let released = self.store.release_stale(cutoff).await?;
        for job_id in &released {
            debug!("Released stale reservation for job: {}", job_id);
        }
        self.observability.record_reservations_released(&released);
        Ok(released)
    }

    /// Reap on every tick until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.config.interval.max(MIN_REAPER_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Starting stale reservation reaper with interval {:?} and timeout {:?}",
            self.config.interval, self.config.reservation_timeout
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.reap_once().await {
                Ok(released) if !released.is_empty() => {
                    info!("Released {} stale reservations", released.len());
                }
                Ok(_) => debug!("No stale reservations found"),
                Err(e) => warn!("Error during reservation reaping: {}", e),
            }
        }

        info!("Stale reservation reaper stopped");
    }
}
