//! Pending → terminal call tracking against an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use overlay_broker::config::TrackingConfig;
use overlay_broker::models::tool_call::ToolCallStatus;
use overlay_broker::persistence::call_repo::{CallLog, CallLogRepo};
use overlay_broker::tracking::{CallTracker, ToolOutcome, TrackingPolicy};
use serde_json::json;

use super::test_helpers::{memory_call_log, FlakyCallLog};

const SESSION: &str = "ses_1";

fn tracker() -> CallTracker {
    CallTracker::from_config(&TrackingConfig::default())
}

fn as_log(repo: &Arc<CallLogRepo>) -> Arc<dyn CallLog> {
    Arc::clone(repo) as Arc<dyn CallLog>
}

fn outcome(output: &str) -> ToolOutcome {
    ToolOutcome {
        title: "title".into(),
        output: output.into(),
        metadata: json!({}),
    }
}

#[tokio::test]
async fn duplicate_begin_creates_one_pending_row() {
    let repo = memory_call_log().await;
    let t = tracker();

    t.begin(as_log(&repo), SESSION, "c1", "bash", json!({"command": "ls"}));
    t.begin(as_log(&repo), SESSION, "c1", "bash", json!({"command": "ls"}));
    t.flush(SESSION).await;

    let rows = repo.get_recent(0, 10).await.expect("recent");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ToolCallStatus::Pending);
    assert!(t.is_pending(SESSION, "c1"));
    assert_eq!(t.pending_count(SESSION), 1);
}

#[tokio::test]
async fn end_updates_the_pending_row_in_place() {
    let repo = memory_call_log().await;
    let t = tracker();

    t.begin(as_log(&repo), SESSION, "c1", "read", json!({"filePath": "/p/a"}));
    t.flush(SESSION).await;
    let pending_id = repo.get_recent(0, 10).await.expect("recent")[0].id;

    t.end(SESSION, "c1", "read", &outcome("file contents")).await;

    let rows = repo.get_recent(0, 10).await.expect("recent");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, pending_id);
    assert_eq!(rows[0].status, ToolCallStatus::Success);
    assert_eq!(rows[0].result.as_ref().unwrap()["output"], "file contents");
    assert_eq!(rows[0].result.as_ref().unwrap()["title"], "title");
    assert!(!t.is_pending(SESSION, "c1"));
}

#[tokio::test]
async fn end_right_after_begin_waits_for_pending_id() {
    let repo = memory_call_log().await;
    let mut flaky = FlakyCallLog::new(Arc::clone(&repo));
    flaky.start_delay = Duration::from_millis(50);
    let log: Arc<dyn CallLog> = Arc::new(flaky);
    let t = tracker();

    t.begin(Arc::clone(&log), SESSION, "c1", "bash", json!({}));
    t.end(SESSION, "c1", "bash", &outcome("done")).await;

    let rows = repo.get_recent(0, 10).await.expect("recent");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ToolCallStatus::Success);
}

#[tokio::test]
async fn three_concurrent_calls_do_not_cross_talk() {
    let repo = memory_call_log().await;
    let t = tracker();

    for n in 1..=3 {
        t.begin(as_log(&repo), SESSION, &format!("c{n}"), "bash", json!({ "n": n }));
    }

    let order = [2, 3, 1];
    join_all(order.iter().map(|n| {
        let t = &t;
        async move {
            let output = if *n == 3 {
                "Error: exit 1".to_owned()
            } else {
                format!("out-{n}")
            };
            t.end(SESSION, &format!("c{n}"), "bash", &outcome(&output)).await;
        }
    }))
    .await;

    let rows = repo.get_recent(0, 10).await.expect("recent");
    assert_eq!(rows.len(), 3);
    for row in rows {
        let n = row.parameters.as_ref().unwrap()["n"].as_i64().unwrap();
        if n == 3 {
            assert_eq!(row.status, ToolCallStatus::Error);
            assert_eq!(row.error.as_deref(), Some("Error: exit 1"));
        } else {
            assert_eq!(row.status, ToolCallStatus::Success);
            assert_eq!(row.result.as_ref().unwrap()["output"], format!("out-{n}"));
        }
    }
    assert_eq!(t.pending_count(SESSION), 0);
}

#[tokio::test]
async fn same_call_id_in_different_sessions_is_distinct() {
    let repo = memory_call_log().await;
    let t = tracker();

    t.begin(as_log(&repo), "s1", "c1", "bash", json!({}));
    t.begin(as_log(&repo), "s2", "c1", "bash", json!({}));
    t.end("s1", "c1", "bash", &outcome("ok")).await;

    assert!(!t.is_pending("s1", "c1"));
    assert!(t.is_pending("s2", "c1"));
    t.flush("s2").await;
    assert_eq!(repo.get_recent(0, 10).await.expect("recent").len(), 2);
}

#[tokio::test]
async fn end_without_begin_is_noop() {
    let repo = memory_call_log().await;
    let t = tracker();

    t.end(SESSION, "ghost", "bash", &outcome("ok")).await;
    assert!(repo.get_recent(0, 10).await.expect("recent").is_empty());
}

#[tokio::test]
async fn json_error_output_marks_error() {
    let repo = memory_call_log().await;
    let t = tracker();

    t.begin(as_log(&repo), SESSION, "c1", "write", json!({}));
    t.end(SESSION, "c1", "write", &outcome(r#"{"error": "read-only file"}"#))
        .await;

    let rows = repo.get_recent(0, 10).await.expect("recent");
    assert_eq!(rows[0].status, ToolCallStatus::Error);
    assert_eq!(rows[0].error.as_deref(), Some("read-only file"));
}

#[tokio::test]
async fn stored_output_is_truncated() {
    let repo = memory_call_log().await;
    let t = CallTracker::new(
        TrackingPolicy::from_config(&TrackingConfig::default()),
        8,
    );

    t.begin(as_log(&repo), SESSION, "c1", "bash", json!({}));
    t.end(SESSION, "c1", "bash", &outcome(&"y".repeat(100))).await;

    let rows = repo.get_recent(0, 10).await.expect("recent");
    assert_eq!(rows[0].result.as_ref().unwrap()["output"], "yyyyyyyy");
}

#[tokio::test]
async fn failed_pending_insert_falls_back_to_one_complete_row() {
    let repo = memory_call_log().await;
    let mut flaky = FlakyCallLog::new(Arc::clone(&repo));
    flaky.fail_start = true;
    let log: Arc<dyn CallLog> = Arc::new(flaky);
    let t = tracker();

    t.begin(Arc::clone(&log), SESSION, "c1", "grep", json!({"pattern": "fn"}));
    assert!(t.is_pending(SESSION, "c1"));
    t.end(SESSION, "c1", "grep", &outcome("3 matches")).await;

    let rows = repo.get_recent(0, 10).await.expect("recent");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ToolCallStatus::Success);
    assert_eq!(rows[0].parameters, Some(json!({"pattern": "fn"})));
    assert!(rows[0].completed_at.unwrap() >= rows[0].started_at);
}

#[tokio::test]
async fn store_failures_never_reach_the_caller() {
    let repo = memory_call_log().await;
    let mut flaky = FlakyCallLog::new(Arc::clone(&repo));
    flaky.fail_all = true;
    let log: Arc<dyn CallLog> = Arc::new(flaky);
    let t = tracker();

    t.begin(Arc::clone(&log), SESSION, "c1", "bash", json!({}));
    t.end(SESSION, "c1", "bash", &outcome("ok")).await;

    assert!(!t.is_pending(SESSION, "c1"));
    assert!(repo.get_recent(0, 10).await.expect("recent").is_empty());
}

#[tokio::test]
async fn excluded_tool_leaves_no_trace() {
    let repo = memory_call_log().await;
    let config = TrackingConfig {
        exclude_tools: vec!["todoread".into()],
        ..TrackingConfig::default()
    };
    let t = CallTracker::from_config(&config);
    let log = as_log(&repo);

    t.begin(Arc::clone(&log), SESSION, "c1", "todoread", json!({}));
    assert!(!t.is_pending(SESSION, "c1"));
    t.end(SESSION, "c1", "todoread", &outcome("[]")).await;

    t.begin(Arc::clone(&log), SESSION, "c2", "bash", json!({}));
    t.end(SESSION, "c2", "bash", &outcome("ok")).await;

    let recent = t.recent(&log, SESSION, 0, 10).await.expect("recent");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].name, "bash");
    assert!(t.by_name(&log, SESSION, "todoread", 10).await.expect("by name").is_empty());
    let stats = t.stats(&log, SESSION).await.expect("stats");
    assert!(stats.iter().all(|s| s.name != "todoread"));
}

#[tokio::test]
async fn untracked_when_not_in_inclusion_list() {
    let repo = memory_call_log().await;
    let config = TrackingConfig {
        track_all: false,
        include_tools: vec!["bash".into()],
        ..TrackingConfig::default()
    };
    let t = CallTracker::from_config(&config);

    t.begin(as_log(&repo), SESSION, "c1", "webfetch", json!({}));
    t.end(SESSION, "c1", "webfetch", &outcome("ok")).await;
    assert!(repo.get_recent(0, 10).await.expect("recent").is_empty());
}

#[tokio::test]
async fn disabled_tracking_records_nothing() {
    let repo = memory_call_log().await;
    let t = CallTracker::new(TrackingPolicy::disabled(), 100);

    t.begin(as_log(&repo), SESSION, "c1", "bash", json!({}));
    t.end(SESSION, "c1", "bash", &outcome("ok")).await;
    assert!(repo.get_recent(0, 10).await.expect("recent").is_empty());
}

#[tokio::test]
async fn in_flight_call_sees_itself_as_pending() {
    let repo = memory_call_log().await;
    let mut flaky = FlakyCallLog::new(Arc::clone(&repo));
    flaky.start_delay = Duration::from_millis(50);
    let log: Arc<dyn CallLog> = Arc::new(flaky);
    let t = tracker();

    t.begin(Arc::clone(&log), SESSION, "c1", "calls", json!({}));
    let recent = t.recent(&log, SESSION, 0, 10).await.expect("recent");

    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].name, "calls");
    assert_eq!(recent[0].status, ToolCallStatus::Pending);
}

#[tokio::test]
async fn forget_session_only_drops_that_session() {
    let repo = memory_call_log().await;
    let t = tracker();

    t.begin(as_log(&repo), SESSION, "c1", "bash", json!({}));
    t.begin(as_log(&repo), SESSION, "c2", "read", json!({}));
    t.begin(as_log(&repo), "ses_2", "c1", "bash", json!({}));
    t.flush(SESSION).await;

    assert_eq!(t.forget_session(SESSION), 2);
    assert_eq!(t.pending_count(SESSION), 0);
    assert!(t.is_pending("ses_2", "c1"));

    // A late after-hook for a forgotten call changes nothing.
    t.end(SESSION, "c1", "bash", &outcome("done")).await;
    let rows = repo.get_by_name("bash", 10).await.expect("rows");
    assert!(rows.iter().all(|r| r.status == ToolCallStatus::Pending));
    assert_eq!(t.forget_session(SESSION), 0);
}
