//! Event relay and sink-readiness integration tests.

use super::common::{events_until_complete, next_matching, next_notice};
use pretty_assertions::assert_eq;
use querymux::events::{GridContentEvent, Notice, QueryEvent, Selection};
use querymux::runner::{MockRunner, QueryInput, RunSpec};
use querymux::session::SessionManager;
use std::sync::Arc;

/// Scenario: Events produced before the sink is ready are not lost
/// Given a session whose subscriber has not announced readiness
/// When a query runs to completion
/// Then no events are delivered yet
/// And marking the sink ready flushes the whole sequence in FIFO order
#[tokio::test]
async fn test_events_buffer_until_sink_ready() {
    let manager = SessionManager::new();
    let session = manager.open_session("untitled-1", Arc::new(MockRunner::new()));
    let mut subscription = manager.subscribe_session(session).unwrap();
    let mut notices = manager.subscribe_notices();

    manager
        .run_query(
            session,
            RunSpec::new(QueryInput::Text("SELECT 1".to_string())),
        )
        .unwrap();

    // Wait for the run to finish without consuming sink events
    loop {
        if let Notice::QueryCompleted { .. } = next_notice(&mut notices).await {
            break;
        }
    }
    assert!(subscription.events.try_recv().is_err());

    manager.mark_sink_ready(session).unwrap();
    let events = events_until_complete(&mut subscription).await;
    assert_eq!(events[0], QueryEvent::Started);
    assert!(matches!(events[1], QueryEvent::Message(_)));
    assert!(events.iter().any(|e| matches!(e, QueryEvent::ResultSet(_))));
    assert!(matches!(events.last(), Some(QueryEvent::Completed { .. })));
}

/// Scenario: A ready sink delivers immediately
#[tokio::test]
async fn test_ready_sink_delivers_live() {
    let manager = SessionManager::new();
    let session = manager.open_session("untitled-1", Arc::new(MockRunner::new()));
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();

    manager
        .run_query(
            session,
            RunSpec::new(QueryInput::Text("SELECT 1".to_string())),
        )
        .unwrap();

    let events = events_until_complete(&mut subscription).await;
    assert_eq!(events[0], QueryEvent::Started);
}

/// Scenario: Grid-content events are dropped while the sink is unready
/// Given an unready sink
/// When grid events are sent before and after readiness
/// Then only the post-readiness event is delivered
#[tokio::test]
async fn test_grid_events_not_buffered() {
    let manager = SessionManager::new();
    let session = manager.open_session("untitled-1", Arc::new(MockRunner::new()));
    let mut subscription = manager.subscribe_session(session).unwrap();

    manager
        .send_grid_event(session, GridContentEvent::RefreshContents)
        .unwrap();
    manager.mark_sink_ready(session).unwrap();
    assert!(subscription.grid_events.try_recv().is_err());

    manager
        .send_grid_event(session, GridContentEvent::ResizeContents)
        .unwrap();
    assert_eq!(
        subscription.grid_events.try_recv().unwrap(),
        GridContentEvent::ResizeContents
    );
}

/// Scenario: Selection runs report their source line
/// Given a query submitted with a document selection
/// When the batch starts
/// Then the message names the one-based start line and carries a link
/// And the selection is recorded on the session
#[tokio::test]
async fn test_selection_run_message_and_recording() {
    let manager = SessionManager::new();
    let session = manager.open_session("untitled-1", Arc::new(MockRunner::new()));
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();

    let selection = Selection {
        start_line: 2,
        start_column: 0,
        end_line: 4,
        end_column: 10,
    };
    manager
        .run_query(
            session,
            RunSpec::new(QueryInput::Selection {
                text: "SELECT * FROM users".to_string(),
                selection,
            }),
        )
        .unwrap();

    let event = next_matching(&mut subscription, |e| matches!(e, QueryEvent::Message(_))).await;
    let QueryEvent::Message(message) = event else {
        unreachable!()
    };
    assert_eq!(message.text, "Started executing query at Line 3");
    assert_eq!(message.link.as_ref().unwrap().text, "Line 3");

    events_until_complete(&mut subscription).await;
    assert_eq!(manager.batch_selections(session).unwrap(), vec![selection]);
}

/// Scenario: Statement runs report the statement's line
#[tokio::test]
async fn test_statement_run_message() {
    let manager = SessionManager::new();
    let session = manager.open_session("untitled-1", Arc::new(MockRunner::new()));
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();

    manager
        .run_query(
            session,
            RunSpec::new(QueryInput::Statement {
                text: "SELECT 1".to_string(),
                line: 7,
            }),
        )
        .unwrap();

    let event = next_matching(&mut subscription, |e| matches!(e, QueryEvent::Message(_))).await;
    let QueryEvent::Message(message) = event else {
        unreachable!()
    };
    assert_eq!(message.text, "Started executing query at Line 8");
}

/// Scenario: A new run resets the recorded selections
#[tokio::test]
async fn test_selections_reset_per_run() {
    let manager = SessionManager::new();
    let session = manager.open_session("untitled-1", Arc::new(MockRunner::new()));
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();

    manager
        .run_query(
            session,
            RunSpec::new(QueryInput::Statement {
                text: "SELECT 1".to_string(),
                line: 0,
            }),
        )
        .unwrap();
    events_until_complete(&mut subscription).await;
    assert_eq!(manager.batch_selections(session).unwrap().len(), 1);

    manager
        .run_query(
            session,
            RunSpec::new(QueryInput::Text("SELECT 2".to_string())),
        )
        .unwrap();
    events_until_complete(&mut subscription).await;
    assert!(manager.batch_selections(session).unwrap().is_empty());
}
