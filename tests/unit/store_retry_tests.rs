//! Bounded backoff on store lock contention.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use overlay_broker::config::StoreConfig;
use overlay_broker::persistence::db::retry_busy;
use overlay_broker::persistence::SessionStore;
use overlay_broker::AppError;

#[tokio::test]
async fn succeeds_after_transient_busy() {
    let attempts = AtomicU32::new(0);
    let counter = &attempts;
    let value = retry_busy(5, Duration::from_millis(1), move || async move {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(AppError::Db("database is locked".into()))
        } else {
            Ok(42)
        }
    })
    .await
    .expect("eventually succeeds");

    assert_eq!(value, 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhaustion_yields_store_busy() {
    let attempts = AtomicU32::new(0);
    let counter = &attempts;
    let err = retry_busy::<(), _, _>(3, Duration::from_millis(1), move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(AppError::Db("database is locked".into()))
    })
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::StoreBusy(_)));
    assert!(err.to_string().contains("3 attempts"));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn non_busy_error_is_not_retried() {
    let attempts = AtomicU32::new(0);
    let counter = &attempts;
    let err = retry_busy::<(), _, _>(5, Duration::from_millis(1), move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(AppError::Db("no such table".into()))
    })
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::Db(_)));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn open_creates_store_file_and_schema() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("ses_1.db");

    let store = SessionStore::open(&path, &StoreConfig::default())
        .await
        .expect("open store");
    assert!(path.exists());

    store
        .kv
        .set("session:id", &serde_json::json!("ses_1"))
        .await
        .expect("kv usable");
    store.close().await;
    assert!(store.is_closed());
}
