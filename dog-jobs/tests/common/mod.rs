//! Store conformance checks shared by every backend.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, TimeZone, Utc};
use serde_json::json;

use dog_jobs::types::timestamp::latest_storable;
use dog_jobs::{DispatchOptions, Dispatcher, JobRecord, JobState, JobStore, QueueError, WorkerId};

fn job(name: &str) -> JobRecord {
    JobRecord::new(name, json!({}))
}

/// C1. Concurrent claimers never share a job
///
/// Every store in `stores` must point at the same data.
pub async fn claims_are_exclusive(stores: Vec<Arc<dyn JobStore>>, jobs: usize) {
    // Arrange: seed jobs through the first handle
    let mut seeded = HashSet::new();
    for n in 0..jobs {
        let record = JobRecord::new("LogQueueable", json!({ "n": n }));
        stores[0].save(&record).await.unwrap();
        seeded.insert(record.id);
    }

    // Act: every handle drains as fast as it can
    let tasks = stores.into_iter().map(|store| {
        tokio::spawn(async move {
            let worker = WorkerId::new();
            let mut claimed = Vec::new();
            while let Some(job) = store.claim(&worker, Utc::now(), &[]).await.unwrap() {
                assert_eq!(job.reserved_by.as_ref(), Some(&worker));
                claimed.push(job.id);
            }
            claimed
        })
    });
    let results = futures::future::join_all(tasks).await;

    // Assert: each job claimed exactly once
    let mut claimed = HashSet::new();
    for result in results {
        for id in result.unwrap() {
            assert!(claimed.insert(id), "job claimed twice");
        }
    }
    assert_eq!(claimed, seeded);
}

/// C2. Oldest eligible job is claimed first
pub async fn claims_in_fifo_order(store: Arc<dyn JobStore>) {
    let base = Utc::now() - TimeDelta::minutes(5);
    let mut older = job("LogQueueable");
    older.created_at = base;
    let mut newer = job("LogQueueable");
    newer.created_at = base + TimeDelta::seconds(1);

    // Saved newest first so insertion order cannot mask the ordering
    store.save(&newer).await.unwrap();
    store.save(&older).await.unwrap();

    let worker = WorkerId::new();
    let now = Utc::now();
    assert_eq!(store.claim(&worker, now, &[]).await.unwrap().unwrap().id, older.id);
    assert_eq!(store.claim(&worker, now, &[]).await.unwrap().unwrap().id, newer.id);
    assert!(store.claim(&worker, now, &[]).await.unwrap().is_none());
}

/// C3. A delayed job is invisible until its time comes
pub async fn delay_is_honored(store: Arc<dyn JobStore>) {
    let dispatcher = Dispatcher::new(store.clone());
    let id = dispatcher
        .dispatch(json!({"task": "log"}), "LogQueueable", DispatchOptions::new().with_wait(Duration::from_secs(5)))
        .await
        .unwrap();
    let due = store.get(&id).await.unwrap().unwrap().next_execution_at.unwrap();

    let worker = WorkerId::new();
    assert!(store.claim(&worker, due - TimeDelta::milliseconds(1), &[]).await.unwrap().is_none());

    let claimed = store.claim(&worker, due, &[]).await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
}

/// C4. Absent optional fields stay absent
pub async fn nullable_fields_round_trip(store: Arc<dyn JobStore>) {
    let record = job("LogQueueable");
    store.save(&record).await.unwrap();

    let loaded = store.get(&record.id).await.unwrap().unwrap();
    assert_eq!(loaded, record);
    assert!(loaded.next_execution_at.is_none());
    assert!(loaded.last_executed_at.is_none());
    assert!(loaded.error_details.is_none());
    assert!(loaded.reserved_by.is_none());
    assert!(loaded.reserved_at.is_none());
}

/// C5. Only waiting and failed jobs are claimable, restricted to the requested lanes
pub async fn claims_respect_state_and_queue(store: Arc<dyn JobStore>) {
    for state in [JobState::Succeeded, JobState::Dead, JobState::Reserved] {
        let mut record = job("LogQueueable");
        record.state = state;
        store.save(&record).await.unwrap();
    }

    let mut mail = job("SendEmail");
    mail.queue = "mail".to_string();
    mail.state = JobState::Failed;
    store.save(&mail).await.unwrap();

    let worker = WorkerId::new();
    let now = Utc::now();
    assert!(store.claim(&worker, now, &["default".to_string()]).await.unwrap().is_none());

    let claimed = store
        .claim(&worker, now, &["default".to_string(), "mail".to_string()])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, mail.id);
    assert!(store.claim(&worker, now, &[]).await.unwrap().is_none());
}

/// C6. Stale reservations are released, fresh ones kept
pub async fn stale_reservations_are_released(store: Arc<dyn JobStore>) {
    let mut abandoned = job("LogQueueable");
    abandoned.created_at = Utc::now() - TimeDelta::minutes(1);
    let fresh = job("LogQueueable");
    store.save(&abandoned).await.unwrap();
    store.save(&fresh).await.unwrap();

    let now = Utc::now();
    store.claim(&WorkerId::new(), now - TimeDelta::hours(1), &[]).await.unwrap().unwrap();
    store.claim(&WorkerId::new(), now, &[]).await.unwrap().unwrap();

    let released = store.release_stale(now - TimeDelta::minutes(15)).await.unwrap();
    assert_eq!(released, vec![abandoned.id.clone()]);

    let reclaimed = store.claim(&WorkerId::new(), now, &[]).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, abandoned.id);
    assert_eq!(reclaimed.attempts, 0);
}

/// C7. Jobs scheduled at the far end of the calendar are not claimable now
pub async fn far_future_jobs_stay_unclaimed(store: Arc<dyn JobStore>) {
    let year_10000 = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();

    // Five-digit years are refused at the door
    let dispatcher = Dispatcher::new(store.clone());
    let dispatched = dispatcher
        .dispatch(json!({}), "LogQueueable", DispatchOptions::new().with_at(year_10000))
        .await;
    assert!(matches!(dispatched, Err(QueueError::Config(_))));

    let mut unstorable = job("LogQueueable");
    unstorable.next_execution_at = Some(year_10000);
    assert!(store.save(&unstorable).await.is_err());
    assert!(store.insert(&unstorable).await.is_err());

    // The last storable instant sorts after every present-day timestamp
    let mut last = job("LogQueueable");
    last.next_execution_at = Some(latest_storable());
    store.insert(&last).await.unwrap();

    let worker = WorkerId::new();
    assert!(store.claim(&worker, Utc::now(), &[]).await.unwrap().is_none());

    let claimed = store.claim(&worker, latest_storable(), &[]).await.unwrap().unwrap();
    assert_eq!(claimed.id, last.id);
}

/// C8. Inserting an existing id fails and leaves the stored job alone
pub async fn insert_never_overwrites(store: Arc<dyn JobStore>) {
    let original = JobRecord::new("LogQueueable", json!({"n": 1}));
    store.insert(&original).await.unwrap();

    let mut clash = JobRecord::new("SendEmail", json!({"n": 2}));
    clash.id = original.id.clone();
    assert!(matches!(store.insert(&clash).await, Err(QueueError::DuplicateJob(_))));

    assert_eq!(store.get(&original.id).await.unwrap().unwrap(), original);
    let counts = store.count_by_state().await.unwrap();
    assert_eq!(counts.get(&JobState::Waiting), Some(&1));
}
