use super::*;
use crate::ledger::models::{HistoryKind, UsageRecord};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

async fn create_test_store() -> (TempDir, SqliteUsageStore) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("usage.db");

    let store = SqliteUsageStore::new(&db_path)
        .await
        .expect("Failed to create test store");

    (temp_dir, store)
}

fn sample_record(identity: &str) -> UsageRecord {
    let now = Utc
        .with_ymd_and_hms(2025, 6, 1, 8, 30, 0)
        .single()
        .expect("valid timestamp");

    let mut record = UsageRecord::new(identity, now);
    record.record_prompt(now);
    record.record_tokens(now, 384);
    record
}

#[tokio::test]
async fn round_trips_a_record() {
    let (_temp_dir, store) = create_test_store().await;

    let record = sample_record("198.51.100.7");
    store.upsert(&record).await.expect("upsert should succeed");

    let loaded = store
        .get("198.51.100.7")
        .await
        .expect("get should succeed")
        .expect("record should exist");

    assert_eq!(loaded, record);
    assert_eq!(
        loaded.history.back().map(|e| e.kind),
        Some(HistoryKind::TokenUpdate)
    );
}

#[tokio::test]
async fn missing_identity_is_none() {
    let (_temp_dir, store) = create_test_store().await;

    let loaded = store.get("203.0.113.1").await.expect("get should succeed");
    assert!(loaded.is_none());
}

#[tokio::test]
async fn upsert_overwrites_whole_record() {
    let (_temp_dir, store) = create_test_store().await;

    let mut record = sample_record("user-42");
    store.upsert(&record).await.expect("first upsert");

    record.record_prompt(record.last_request_at);
    record.record_tokens(record.last_request_at, 100);
    store.upsert(&record).await.expect("second upsert");

    let loaded = store
        .get("user-42")
        .await
        .expect("get should succeed")
        .expect("record should exist");

    assert_eq!(loaded.prompt_count, 2);
    assert_eq!(loaded.token_count, 484);
    assert_eq!(loaded.history.len(), record.history.len());
}

#[tokio::test]
async fn load_all_returns_every_identity() {
    let (_temp_dir, store) = create_test_store().await;

    store
        .upsert(&sample_record("a"))
        .await
        .expect("upsert a");
    store
        .upsert(&sample_record("b"))
        .await
        .expect("upsert b");

    let all = store.load_all().await.expect("load_all should succeed");
    let identities: Vec<&str> = all.iter().map(|r| r.identity.as_str()).collect();
    assert_eq!(identities, vec!["a", "b"]);
}
