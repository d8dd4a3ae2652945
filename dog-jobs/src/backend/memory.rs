use std::collections::hash_map::Entry as Slot;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{
    backend::{JobStore, StoreConnector},
    JobId, JobRecord, JobState, QueueError, QueueResult, WorkerId,
};

/// Stored record plus insertion sequence, the FIFO tie-breaker for equal `created_at`
#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    record: JobRecord,
}

/// In-memory store for tests and development
///
/// Clones share the same jobs, so one store can be handed to many workers.
#[derive(Clone, Default)]
pub struct MemoryStore {
    jobs: Arc<RwLock<HashMap<JobId, Entry>>>,
    sequence: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Snapshot of every stored job, oldest first
    pub fn snapshot(&self) -> Vec<JobRecord> {
        let jobs = self.jobs.read();
        let mut entries: Vec<&Entry> = jobs.values().collect();
        entries.sort_by_key(|e| (e.record.created_at, e.seq));
        entries.into_iter().map(|e| e.record.clone()).collect()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, job: &JobRecord) -> QueueResult<()> {
        job.ensure_storable()?;

        match self.jobs.write().entry(job.id.clone()) {
            Slot::Occupied(_) => Err(QueueError::DuplicateJob(job.id.to_string())),
            Slot::Vacant(slot) => {
                let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                slot.insert(Entry { seq, record: job.clone() });
                Ok(())
            }
        }
    }

    async fn save(&self, job: &JobRecord) -> QueueResult<()> {
        job.ensure_storable()?;

        let mut jobs = self.jobs.write();
        match jobs.get_mut(&job.id) {
            Some(entry) => entry.record = job.clone(),
            None => {
                let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                jobs.insert(job.id.clone(), Entry { seq, record: job.clone() });
            }
        }
        Ok(())
    }

    async fn claim(
        &self,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
        queues: &[String],
    ) -> QueueResult<Option<JobRecord>> {
        // Selection and reservation happen under one write lock
        let mut jobs = self.jobs.write();

        let next = jobs
            .values_mut()
            .filter(|e| e.record.is_eligible(now))
            .filter(|e| queues.is_empty() || queues.iter().any(|q| *q == e.record.queue))
            .min_by_key(|e| (e.record.created_at, e.seq));

        Ok(next.map(|entry| {
            entry.record.reserve(worker_id, now);
            entry.record.clone()
        }))
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.jobs.read().get(id).map(|e| e.record.clone()))
    }

    async fn release_stale(&self, reserved_before: DateTime<Utc>) -> QueueResult<Vec<JobId>> {
        let mut jobs = self.jobs.write();
        let mut released = Vec::new();

        for entry in jobs.values_mut() {
            let stale = entry.record.is_reserved()
                && entry.record.reserved_at.map_or(true, |at| at < reserved_before);
            if stale {
                entry.record.release();
                released.push(entry.record.id.clone());
            }
        }

        Ok(released)
    }

    async fn count_by_state(&self) -> QueueResult<HashMap<JobState, u64>> {
        let mut counts = HashMap::new();
        for entry in self.jobs.read().values() {
            *counts.entry(entry.record.state).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn connect(&self) -> QueueResult<Arc<dyn JobStore>> {
        Ok(Arc::new(self.clone()))
    }
}
