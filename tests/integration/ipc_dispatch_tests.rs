//! JSON-line request dispatch, without a socket.

use std::sync::Arc;

use overlay_broker::broker::Broker;
use overlay_broker::ipc::server::handle_line;
use overlay_broker::overlay::OverlayProcess;
use serde_json::json;

use super::test_helpers::{test_config, FakeOverlay};

fn broker(root: &std::path::Path) -> Broker {
    Broker::with_overlay(
        test_config(root),
        Arc::new(FakeOverlay::healthy()) as Arc<dyn OverlayProcess>,
    )
}

#[tokio::test]
async fn full_session_over_json_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let project = dir.path().join("project");
    std::fs::create_dir_all(&project).expect("project dir");
    let b = broker(dir.path());
    let hooks = b.hooks();

    let begin = json!({
        "command": "session_begin",
        "session_id": "s1",
        "project_path": project,
    });
    let resp = handle_line(hooks, &begin.to_string()).await;
    assert!(resp.ok, "{resp:?}");
    let data = resp.data.expect("data");
    assert_eq!(data["created"], true);
    assert_eq!(data["mounted"], true);

    let before = json!({
        "command": "tool_before",
        "tool": "bash",
        "session_id": "s1",
        "call_id": "c1",
        "args": { "command": "ls" },
    });
    assert!(handle_line(hooks, &before.to_string()).await.ok);

    let after = json!({
        "command": "tool_after",
        "tool": "bash",
        "session_id": "s1",
        "call_id": "c1",
        "output": "a.rs",
    });
    let resp = handle_line(hooks, &after.to_string()).await;
    assert_eq!(resp.data.expect("data")["output"], "a.rs");

    let resp = handle_line(hooks, r#"{"command":"stats","session_id":"s1"}"#).await;
    let stats = resp.data.expect("data")["stats"].clone();
    assert_eq!(stats[0]["name"], "bash");
    assert_eq!(stats[0]["total"], 1);
    assert_eq!(stats[0]["successful"], 1);

    let resp = handle_line(hooks, r#"{"command":"calls","session_id":"s1","name":"bash"}"#).await;
    assert_eq!(resp.data.expect("data")["calls"].as_array().map(Vec::len), Some(1));

    let kv = r#"{"command":"kv","session_id":"s1","prefix":"session:"}"#;
    let resp = handle_line(hooks, kv).await;
    let entries = resp.data.expect("data")["entries"].clone();
    assert_eq!(entries["session:id"], "s1");

    let resp = handle_line(hooks, r#"{"command":"sessions"}"#).await;
    assert_eq!(resp.data.expect("data")["sessions"].as_array().map(Vec::len), Some(1));

    let resp = handle_line(hooks, r#"{"command":"session_end","session_id":"s1"}"#).await;
    assert_eq!(resp.data.expect("data")["ended"], true);
    assert!(b.registry().is_empty());
}

#[tokio::test]
async fn malformed_line_is_an_error_response() {
    let dir = tempfile::tempdir().expect("tempdir");
    let b = broker(dir.path());

    let resp = handle_line(b.hooks(), "{not json").await;
    assert!(!resp.ok);
    assert!(resp.error.unwrap().starts_with("invalid request"));

    let resp = handle_line(b.hooks(), r#"{"command":"approve","id":"x"}"#).await;
    assert!(!resp.ok);
}

#[tokio::test]
async fn query_for_unknown_session_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let b = broker(dir.path());

    let resp = handle_line(b.hooks(), r#"{"command":"calls","session_id":"ghost"}"#).await;
    assert!(!resp.ok);
    assert!(resp.error.unwrap().starts_with("not found"));
}

#[tokio::test]
async fn lifecycle_events_for_unknown_session_succeed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let b = broker(dir.path());

    let resp = handle_line(b.hooks(), r#"{"command":"session_end","session_id":"ghost"}"#).await;
    assert!(resp.ok);
    assert_eq!(resp.data.expect("data")["ended"], false);
}
