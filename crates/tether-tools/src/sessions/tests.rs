use super::history::scan;
use super::*;
use crate::sandbox::Verdict;
use crate::types::{DenyReason, ExecutionRequest, OperatorId};
use chrono::{Duration as ChronoDuration, TimeZone};
use std::path::Path;
use std::sync::Arc;

fn summary(id: &str, minutes_ago: i64) -> SessionSummary {
    SessionSummary {
        id: SessionId::new(id),
        title: format!("session {}", id),
        updated_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
    }
}

fn registry_with(sessions: Vec<SessionSummary>, scope: PinScope) -> SessionRegistry {
    let mut source = MockSessionSource::new();
    source
        .expect_recent_sessions()
        .returning(move |_| Ok(sessions.clone()));
    SessionRegistry::new(Arc::new(source), scope)
}

fn empty_registry(scope: PinScope) -> SessionRegistry {
    SessionRegistry::new(Arc::new(MockSessionSource::new()), scope)
}

#[tokio::test]
async fn test_list_recent_orders_and_limits() {
    let registry = registry_with(
        vec![summary("old", 30), summary("new", 1), summary("mid", 10)],
        PinScope::Operator,
    );
    let listed = registry.list_recent(2, 60).await.unwrap();
    let ids: Vec<_> = listed.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["new", "mid"]);
}

#[tokio::test]
async fn test_list_recent_clamps_limit() {
    let sessions = (0..30).map(|i| summary(&format!("s{}", i), i)).collect();
    let registry = registry_with(sessions, PinScope::Operator);
    assert_eq!(registry.list_recent(0, 60).await.unwrap().len(), 1);
    assert_eq!(registry.list_recent(100, 60).await.unwrap().len(), MAX_LIST_LIMIT);
}

#[tokio::test]
async fn test_list_recent_passes_window() {
    let mut source = MockSessionSource::new();
    source
        .expect_recent_sessions()
        .withf(|window| *window == std::time::Duration::from_secs(15 * 60))
        .times(1)
        .returning(|_| Ok(Vec::new()));
    let registry = SessionRegistry::new(Arc::new(source), PinScope::Operator);
    assert!(registry.list_recent(5, 15).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pin_per_operator() {
    let registry = empty_registry(PinScope::Operator);
    let alice = OperatorId::from("alice");
    let bob = OperatorId::from("bob");

    assert_eq!(registry.pin(&alice, "abc-123").await, Verdict::Allow);
    assert_eq!(registry.pinned(&alice).await, SessionId::parse("abc-123"));
    assert_eq!(registry.pinned(&bob).await, None);

    assert!(registry.unpin(&alice).await);
    assert!(!registry.unpin(&alice).await);
    assert_eq!(registry.pinned(&alice).await, None);
}

#[tokio::test]
async fn test_pin_global_scope() {
    let registry = empty_registry(PinScope::Global);
    let alice = OperatorId::from("alice");
    let bob = OperatorId::from("bob");

    registry.pin(&alice, "first").await;
    registry.pin(&bob, "second").await;
    assert_eq!(registry.pinned(&alice).await, SessionId::parse("second"));
}

#[tokio::test]
async fn test_pin_rejects_bad_id() {
    let registry = empty_registry(PinScope::Operator);
    let op = OperatorId::from("alice");
    let verdict = registry.pin(&op, "abc --dangerously-skip-permissions").await;
    assert!(matches!(
        verdict,
        Verdict::Deny(DenyReason::InvalidRequest { .. })
    ));
    assert_eq!(registry.pinned(&op).await, None);
}

#[tokio::test]
async fn test_apply_pin_precedence() {
    let registry = empty_registry(PinScope::Operator);
    let op = OperatorId::from("alice");
    registry.pin(&op, "pinned").await;
    let timeout = std::time::Duration::from_secs(1);

    let plain = registry
        .apply_pin(ExecutionRequest::new(op.clone(), "ls", timeout))
        .await;
    assert_eq!(plain.target_session, SessionId::parse("pinned"));

    let explicit = registry
        .apply_pin(
            ExecutionRequest::new(op.clone(), "ls", timeout)
                .with_session(SessionId::new("explicit")),
        )
        .await;
    assert_eq!(explicit.target_session, Some(SessionId::new("explicit")));

    let cont = registry
        .apply_pin(ExecutionRequest::new(op, "ls", timeout).with_continue())
        .await;
    assert_eq!(cont.target_session, None);
}

#[tokio::test]
async fn test_pins_persist_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("session_bindings.json");
    let op = OperatorId::from(42_i64);

    let registry = empty_registry(PinScope::Operator).with_store(&store);
    registry.pin(&op, "keep-me").await;
    drop(registry);

    let reloaded = empty_registry(PinScope::Operator).with_store(&store);
    assert_eq!(reloaded.pinned(&op).await, SessionId::parse("keep-me"));

    reloaded.unpin(&op).await;
    let reloaded = empty_registry(PinScope::Operator).with_store(&store);
    assert_eq!(reloaded.pinned(&op).await, None);
}

#[tokio::test]
async fn test_corrupt_store_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("session_bindings.json");
    std::fs::write(&store, "{not json").unwrap();
    let registry = empty_registry(PinScope::Operator).with_store(&store);
    assert_eq!(registry.pinned(&OperatorId::from("x")).await, None);
}

#[test]
fn test_normalize_title() {
    assert_eq!(normalize_title("  fix\n the\r\n  tests "), "fix the tests");
    assert_eq!(normalize_title("[Pasted text #1 +40 lines]"), "(pasted text)");
    let long = "x".repeat(120);
    let out = normalize_title(&long);
    assert_eq!(out.chars().count(), MAX_TITLE_CHARS + 1);
    assert!(out.ends_with('…'));
}

#[test]
fn test_display_line() {
    let s = SessionSummary {
        id: SessionId::new("abc"),
        title: "hello\nworld".to_string(),
        updated_at: Utc.with_ymd_and_hms(2026, 1, 31, 14, 5, 0).unwrap(),
    };
    assert_eq!(s.display_line(), "abc | hello world | updated: 2026-01-31T14");
}

fn touch_env(root: &Path, id: &str) {
    std::fs::create_dir_all(root.join("session-env").join(id)).unwrap();
}

#[test]
fn test_scan_reads_session_files_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let now = Utc::now();
    std::fs::create_dir_all(root.join("sessions")).unwrap();

    touch_env(root, "with-file");
    let updated = (now - ChronoDuration::minutes(5)).to_rfc3339();
    std::fs::write(
        root.join("sessions/with-file.json"),
        format!(r#"{{"id":"with-file","title":"Refactor parser","updatedAt":"{}"}}"#, updated),
    )
    .unwrap();

    touch_env(root, "from-history");
    let ts = (now - ChronoDuration::minutes(2)).timestamp_millis();
    std::fs::write(
        root.join("history.jsonl"),
        format!(
            "not json\n{{\"sessionId\":\"from-history\",\"display\":\"add tests\",\"timestamp\":{}}}\n",
            ts
        ),
    )
    .unwrap();

    touch_env(root, "stale");
    std::fs::write(
        root.join("sessions/stale.json"),
        r#"{"title":"old work","updatedAt":"2020-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    touch_env(root, "broken");
    std::fs::write(root.join("sessions/broken.json"), "{").unwrap();

    let sessions = scan(root, now, std::time::Duration::from_secs(3600)).unwrap();
    let ids: Vec<_> = sessions.iter().map(|s| s.id.as_str()).collect();
    // broken falls back to the directory mtime, which is "now"
    assert_eq!(ids, vec!["broken", "from-history", "with-file"]);
    assert_eq!(sessions[0].title, "(unreadable)");
    assert_eq!(sessions[1].title, "add tests");
    assert_eq!(sessions[2].title, "Refactor parser");
}

#[test]
fn test_scan_without_env_dir_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let sessions = scan(dir.path(), Utc::now(), std::time::Duration::from_secs(3600)).unwrap();
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_tool_history_source() {
    let dir = tempfile::tempdir().unwrap();
    touch_env(dir.path(), "live");
    let source = ToolHistorySource::new(dir.path());
    let sessions = source
        .recent_sessions(std::time::Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].title, "(no session file)");
}
