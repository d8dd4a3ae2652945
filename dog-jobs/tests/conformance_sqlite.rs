#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;

use tempfile::TempDir;

use dog_jobs::{JobStore, SqliteStore};

/// Fresh database file with the schema applied
async fn database() -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
    SqliteStore::connect(&url).await.unwrap().ensure_schema().await.unwrap();
    (dir, url)
}

async fn store() -> (TempDir, Arc<dyn JobStore>) {
    let (dir, url) = database().await;
    let store = SqliteStore::connect(&url).await.unwrap();
    (dir, Arc::new(store))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_claims_are_exclusive() {
    let (_dir, url) = database().await;

    // One connection per claimer, like one per worker
    let mut stores: Vec<Arc<dyn JobStore>> = Vec::new();
    for _ in 0..6 {
        stores.push(Arc::new(SqliteStore::connect(&url).await.unwrap()));
    }
    common::claims_are_exclusive(stores, 60).await;
}

#[tokio::test]
async fn test_claims_in_fifo_order() {
    let (_dir, store) = store().await;
    common::claims_in_fifo_order(store).await;
}

#[tokio::test]
async fn test_delay_is_honored() {
    let (_dir, store) = store().await;
    common::delay_is_honored(store).await;
}

#[tokio::test]
async fn test_nullable_fields_round_trip() {
    let (_dir, store) = store().await;
    common::nullable_fields_round_trip(store).await;
}

#[tokio::test]
async fn test_claims_respect_state_and_queue() {
    let (_dir, store) = store().await;
    common::claims_respect_state_and_queue(store).await;
}

#[tokio::test]
async fn test_stale_reservations_are_released() {
    let (_dir, store) = store().await;
    common::stale_reservations_are_released(store).await;
}

#[tokio::test]
async fn test_far_future_jobs_stay_unclaimed() {
    let (_dir, store) = store().await;
    common::far_future_jobs_stay_unclaimed(store).await;
}

#[tokio::test]
async fn test_insert_never_overwrites() {
    let (_dir, store) = store().await;
    common::insert_never_overwrites(store).await;
}

#[tokio::test]
async fn test_schema_is_idempotent() {
    let (_dir, url) = database().await;
    let store = SqliteStore::connect(&url).await.unwrap();
    store.ensure_schema().await.unwrap();
    store.ensure_schema().await.unwrap();
}
