use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Number of execution samples kept per job type
const MAX_SAMPLES: usize = 1000;

/// Live counters for queue operations
#[derive(Default)]
pub struct LiveMetrics {
    jobs_enqueued: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_dead: AtomicU64,
    reservations_released: AtomicU64,

    // Per-job-type metrics
    job_type_metrics: RwLock<HashMap<String, JobTypeMetrics>>,

    performance: RwLock<PerformanceMetrics>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_jobs_enqueued(&self, job_type: &str) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
        self.job_type_metrics.write().entry(job_type.to_string()).or_default().enqueued += 1;
    }

    pub fn increment_jobs_succeeded(&self, job_type: &str) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
        self.job_type_metrics.write().entry(job_type.to_string()).or_default().succeeded += 1;
    }

    pub fn increment_jobs_retried(&self, job_type: &str) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
        self.job_type_metrics.write().entry(job_type.to_string()).or_default().retried += 1;
    }

    pub fn increment_jobs_dead(&self, job_type: &str) {
        self.jobs_dead.fetch_add(1, Ordering::Relaxed);
        self.job_type_metrics.write().entry(job_type.to_string()).or_default().dead += 1;
    }

    pub fn increment_reservations_released(&self, count: u64) {
        self.reservations_released.fetch_add(count, Ordering::Relaxed);
    }

    pub fn jobs_enqueued(&self) -> u64 {
        self.jobs_enqueued.load(Ordering::Relaxed)
    }

    pub fn jobs_succeeded(&self) -> u64 {
        self.jobs_succeeded.load(Ordering::Relaxed)
    }

    pub fn jobs_retried(&self) -> u64 {
        self.jobs_retried.load(Ordering::Relaxed)
    }

    pub fn jobs_dead(&self) -> u64 {
        self.jobs_dead.load(Ordering::Relaxed)
    }

    pub fn reservations_released(&self) -> u64 {
        self.reservations_released.load(Ordering::Relaxed)
    }

    /// Get metrics for a specific job type
    pub fn job_type_metrics(&self, job_type: &str) -> Option<JobTypeMetrics> {
        self.job_type_metrics.read().get(job_type).cloned()
    }

    pub fn all_job_type_metrics(&self) -> HashMap<String, JobTypeMetrics> {
        self.job_type_metrics.read().clone()
    }

    /// Record how long one handler invocation took
    pub fn record_execution_time(&self, job_type: &str, duration: Duration) {
        self.performance.write().record_execution_time(job_type, duration);
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.performance.read().clone()
    }

    /// Collect current snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            global: GlobalMetrics {
                jobs_enqueued: self.jobs_enqueued(),
                jobs_succeeded: self.jobs_succeeded(),
                jobs_retried: self.jobs_retried(),
                jobs_dead: self.jobs_dead(),
                reservations_released: self.reservations_released(),
            },
            job_types: self.all_job_type_metrics(),
            performance: self.performance_metrics(),
        }
    }
}

/// Metrics for a specific job type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobTypeMetrics {
    pub enqueued: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dead: u64,
}

impl JobTypeMetrics {
    /// Share of finished attempts that succeeded, as a percentage
    pub fn success_rate(&self) -> f64 {
        let attempts = self.succeeded + self.retried + self.dead;
        if attempts == 0 {
            100.0
        } else {
            (self.succeeded as f64 / attempts as f64) * 100.0
        }
    }
}

/// Handler execution times per job type
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    execution_times: HashMap<String, Vec<Duration>>,
    last_updated: DateTime<Utc>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            execution_times: HashMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn record_execution_time(&mut self, job_type: &str, duration: Duration) {
        let times = self.execution_times.entry(job_type.to_string()).or_default();
        times.push(duration);

        if times.len() > MAX_SAMPLES {
            times.remove(0);
        }

        self.last_updated = Utc::now();
    }

    pub fn average_execution_time(&self, job_type: &str) -> Option<Duration> {
        let times = self.execution_times.get(job_type)?;
        if times.is_empty() {
            return None;
        }

        let total: Duration = times.iter().sum();
        Some(total / times.len() as u32)
    }

    pub fn percentile_execution_time(&self, job_type: &str, percentile: f64) -> Option<Duration> {
        let times = self.execution_times.get(job_type)?;
        if times.is_empty() {
            return None;
        }

        let mut sorted = times.clone();
        sorted.sort();

        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted.get(index).copied()
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub global: GlobalMetrics,
    pub job_types: HashMap<String, JobTypeMetrics>,
    pub performance: PerformanceMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalMetrics {
    pub jobs_enqueued: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_dead: u64,
    pub reservations_released: u64,
}

impl GlobalMetrics {
    /// Jobs enqueued but not yet succeeded or dead-lettered
    pub fn jobs_outstanding(&self) -> u64 {
        self.jobs_enqueued
            .saturating_sub(self.jobs_succeeded + self.jobs_dead)
    }
}
