//! Edit-session integration tests through the session manager.

use super::common::{events_until_complete, next_event, next_notice};
use pretty_assertions::assert_eq;
use querymux::error::QueryMuxError;
use querymux::events::{Notice, QueryEvent};
use querymux::runner::{
    EditRowState, EditTarget, FailingRunner, MockRunner, QueryInput, RunSpec,
};
use querymux::session::{SessionId, SessionManager};
use std::sync::Arc;

fn users_target() -> EditTarget {
    EditTarget {
        schema: Some("public".to_string()),
        object: "users".to_string(),
        object_type: "TABLE".to_string(),
        row_limit: None,
    }
}

/// Scenario: Initializing an edit session reports readiness
/// Given an open session with a ready sink
/// When an edit session is initialized
/// Then the subscriber sees EditSessionReady with success
/// And a matching notice is broadcast
/// And the session returns to idle
#[tokio::test]
async fn test_initialize_edit_reports_ready() {
    let manager = SessionManager::new();
    let session = manager.open_session("untitled-1", Arc::new(MockRunner::new()));
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();
    let mut notices = manager.subscribe_notices();

    manager.initialize_edit(session, users_target()).unwrap();

    let events = events_until_complete(&mut subscription).await;
    assert!(events.iter().any(|e| matches!(
        e,
        QueryEvent::EditSessionReady {
            success: true,
            message: None
        }
    )));

    loop {
        match next_notice(&mut notices).await {
            Notice::EditSessionReady {
                session: s,
                success,
                message,
            } => {
                assert_eq!(s, session);
                assert!(success);
                assert_eq!(message, None);
                break;
            }
            _ => continue,
        }
    }
    assert!(!manager.is_running(session));
}

/// Scenario: Edit initialization is gated like a run
/// Given a session with a query in flight
/// When an edit session is initialized
/// Then it fails with SessionBusy
#[tokio::test]
async fn test_initialize_edit_rejected_while_busy() {
    let (runner, handle) = MockRunner::pending();
    let manager = SessionManager::new();
    let session = manager.open_session("untitled-1", Arc::new(runner));
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();

    manager
        .run_query(
            session,
            RunSpec::new(QueryInput::Text("SELECT 1".to_string())),
        )
        .unwrap();

    assert!(matches!(
        manager.initialize_edit(session, users_target()),
        Err(QueryMuxError::SessionBusy(_))
    ));

    handle.finish();
    events_until_complete(&mut subscription).await;
}

/// Scenario: Edit staging is rejected while an execution is in flight
/// Given a session with a query in flight
/// When cell and row staging operations are attempted
/// Then each fails with SessionBusy
/// And the session becomes editable again once the run completes
#[tokio::test]
async fn test_edit_staging_rejected_while_busy() {
    let (runner, handle) = MockRunner::pending();
    let manager = SessionManager::new();
    let session = manager.open_session("untitled-1", Arc::new(runner));
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();

    manager
        .run_query(
            session,
            RunSpec::new(QueryInput::Text("SELECT 1".to_string())),
        )
        .unwrap();

    assert!(matches!(
        manager.update_cell(session, 0, 0, "x".to_string()).await,
        Err(QueryMuxError::SessionBusy(_))
    ));
    assert!(matches!(
        manager.commit_edit(session).await,
        Err(QueryMuxError::SessionBusy(_))
    ));
    assert!(matches!(
        manager.create_row(session).await,
        Err(QueryMuxError::SessionBusy(_))
    ));
    assert!(matches!(
        manager.delete_row(session, 0).await,
        Err(QueryMuxError::SessionBusy(_))
    ));
    assert!(matches!(
        manager.revert_cell(session, 0, 0).await,
        Err(QueryMuxError::SessionBusy(_))
    ));
    assert!(matches!(
        manager.revert_row(session, 0).await,
        Err(QueryMuxError::SessionBusy(_))
    ));
    assert!(matches!(
        manager.edit_rows(session, 0, 10).await,
        Err(QueryMuxError::SessionBusy(_))
    ));
    assert!(matches!(
        manager.dispose_edit(session).await,
        Err(QueryMuxError::SessionBusy(_))
    ));

    handle.finish();
    events_until_complete(&mut subscription).await;

    manager.initialize_edit(session, users_target()).unwrap();
    events_until_complete(&mut subscription).await;
    manager
        .update_cell(session, 0, 1, "Alicia".to_string())
        .await
        .unwrap();
}

/// Scenario: Staged edits flow through the manager and commit
/// Given an initialized edit session
/// When a cell is updated, a row created, and a row deleted
/// Then the merged view reflects the staged state
/// And committing executes delete, update, and insert statements in order
#[tokio::test]
async fn test_edit_stage_and_commit() {
    let runner = Arc::new(MockRunner::new());
    let manager = SessionManager::new();
    let session = manager.open_session("untitled-1", runner.clone());
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();

    manager.initialize_edit(session, users_target()).unwrap();
    events_until_complete(&mut subscription).await;

    let outcome = manager
        .update_cell(session, 0, 1, "Alicia".to_string())
        .await
        .unwrap();
    assert!(outcome.row_dirty);

    let created = manager.create_row(session).await.unwrap();
    manager
        .update_cell(session, created.row_id, 0, "3".to_string())
        .await
        .unwrap();
    manager.delete_row(session, 1).await.unwrap();

    let page = manager.edit_rows(session, 0, 10).await.unwrap();
    assert_eq!(page.rows[0].state, EditRowState::DirtyUpdate);
    assert_eq!(page.rows[1].state, EditRowState::DirtyDelete);
    assert_eq!(page.rows[2].state, EditRowState::DirtyInsert);

    manager.commit_edit(session).await.unwrap();
    let committed = runner.committed_statements();
    assert_eq!(committed.len(), 3);
    assert!(committed[0].sql.starts_with("DELETE"));
    assert!(committed[1].sql.starts_with("UPDATE"));
    assert!(committed[2].sql.starts_with("INSERT"));
}

/// Scenario: Reverts undo staged changes
#[tokio::test]
async fn test_edit_revert_paths() {
    let manager = SessionManager::new();
    let session = manager.open_session("untitled-1", Arc::new(MockRunner::new()));
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();

    manager.initialize_edit(session, users_target()).unwrap();
    events_until_complete(&mut subscription).await;

    manager
        .update_cell(session, 0, 1, "Alicia".to_string())
        .await
        .unwrap();
    let outcome = manager.revert_cell(session, 0, 1).await.unwrap();
    assert!(!outcome.cell.is_dirty);
    assert_eq!(outcome.cell.display_value, "Alice");

    manager.delete_row(session, 1).await.unwrap();
    manager.revert_row(session, 1).await.unwrap();

    let page = manager.edit_rows(session, 0, 10).await.unwrap();
    assert!(page.rows.iter().all(|r| r.state == EditRowState::Clean));
}

/// Scenario: A rejected cell update is surfaced on the notice stream
/// Given an edit session over typed columns
/// When a cell update fails to parse
/// Then the error is returned and also published as a notice
#[tokio::test]
async fn test_rejected_update_publishes_notice() {
    let manager = SessionManager::new();
    let session = manager.open_session("untitled-1", Arc::new(MockRunner::new()));
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();

    manager.initialize_edit(session, users_target()).unwrap();
    events_until_complete(&mut subscription).await;

    let mut notices = manager.subscribe_notices();
    let result = manager
        .update_cell(session, 0, 0, "not-a-number".to_string())
        .await;
    assert!(result.is_err());

    let notice = next_notice(&mut notices).await;
    assert!(matches!(
        notice,
        Notice::Error {
            session: Some(s),
            ..
        } if s == session
    ));
}

/// Scenario: A backend that cannot edit reports failure, not silence
/// Given a runner whose edit initialization fails
/// When an edit session is initialized
/// Then the subscriber sees EditSessionReady with success=false and a message
#[tokio::test]
async fn test_failed_edit_initialization() {
    let manager = SessionManager::new();
    let session = manager.open_session("untitled-1", Arc::new(FailingRunner));
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();

    manager.initialize_edit(session, users_target()).unwrap();

    loop {
        match next_event(&mut subscription).await {
            QueryEvent::EditSessionReady { success, message } => {
                assert!(!success);
                assert!(message.unwrap().contains("mock edit failure"));
                break;
            }
            QueryEvent::Completed { .. } => panic!("completed without edit readiness"),
            _ => continue,
        }
    }
}

/// Scenario: Edit operations on unknown sessions are rejected
#[tokio::test]
async fn test_edit_on_unknown_session() {
    let manager = SessionManager::new();
    let ghost = SessionId::from_raw(u64::MAX - 1);

    assert!(matches!(
        manager.initialize_edit(ghost, users_target()),
        Err(QueryMuxError::SessionNotFound(_))
    ));
    assert!(matches!(
        manager.commit_edit(ghost).await,
        Err(QueryMuxError::SessionNotFound(_))
    ));
    assert!(matches!(
        manager.edit_rows(ghost, 0, 10).await,
        Err(QueryMuxError::SessionNotFound(_))
    ));
    assert!(matches!(
        manager.dispose_edit(ghost).await,
        Err(QueryMuxError::SessionNotFound(_))
    ));
}

/// Scenario: Disposing an edit session clears the cache
#[tokio::test]
async fn test_dispose_edit() {
    let manager = SessionManager::new();
    let session = manager.open_session("untitled-1", Arc::new(MockRunner::new()));
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();

    manager.initialize_edit(session, users_target()).unwrap();
    events_until_complete(&mut subscription).await;

    manager.dispose_edit(session).await.unwrap();
    assert!(manager.edit_rows(session, 0, 10).await.is_err());
}
