//! PostgreSQL runner integration tests.
//!
//! These tests require a running PostgreSQL database.
//! Set DATABASE_URL environment variable to run them.

use querymux::config::ConnectionConfig;
use querymux::error::QueryMuxError;
use querymux::events::{QueryEvent, RowPage, Value};
use querymux::runner::{PostgresRunner, QueryInput, RunSpec, RunnerSettings};
use querymux::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;

use super::common::events_until_complete;

/// Helper to create a test runner from DATABASE_URL.
async fn get_test_runner() -> Option<PostgresRunner> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let config = ConnectionConfig::from_connection_string(&url).ok()?;
    PostgresRunner::connect(&config, RunnerSettings::default())
        .await
        .ok()
}

/// Scenario: A query run through a session yields real rows
/// Given a session backed by a live database
/// When a generate_series query runs
/// Then the result set is announced and pageable
#[tokio::test]
async fn test_postgres_run_and_page() {
    let Some(runner) = get_test_runner().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let manager = SessionManager::new();
    let session = manager.open_session("pg-test", Arc::new(runner));
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();

    manager
        .run_query(
            session,
            RunSpec::new(QueryInput::Text(
                "SELECT generate_series(1, 5) AS n".to_string(),
            )),
        )
        .unwrap();

    let events = events_until_complete(&mut subscription).await;
    let summary = events
        .iter()
        .find_map(|e| match e {
            QueryEvent::ResultSet(s) => Some(s.clone()),
            _ => None,
        })
        .expect("expected a result set");
    assert_eq!(summary.row_count, 5);
    assert_eq!(summary.columns[0].name, "n");

    let page = manager
        .query_rows(
            session,
            RowPage {
                batch_id: 0,
                result_id: 0,
                row_start: 2,
                row_count: 2,
            },
        )
        .await
        .unwrap();
    assert_eq!(page.rows.len(), 2);
    assert_eq!(page.rows[0][0], Value::Int(3));

    manager.close_session(session).await.unwrap();
}

/// Scenario: Result sets larger than max_rows are truncated
/// Given a runner limited to 100 buffered rows
/// When a 500-row query runs
/// Then only 100 rows are buffered and a truncation message is emitted
#[tokio::test]
async fn test_postgres_truncates_large_results() {
    let Some(url) = std::env::var("DATABASE_URL").ok() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let config = ConnectionConfig::from_connection_string(&url).unwrap();
    let settings = RunnerSettings {
        query_timeout: Duration::from_secs(30),
        max_rows: 100,
    };
    let Ok(runner) = PostgresRunner::connect(&config, settings).await else {
        eprintln!("Skipping test: could not connect");
        return;
    };

    let manager = SessionManager::new();
    let session = manager.open_session("pg-test", Arc::new(runner));
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();

    manager
        .run_query(
            session,
            RunSpec::new(QueryInput::Text(
                "SELECT generate_series(1, 500) AS n".to_string(),
            )),
        )
        .unwrap();

    let events = events_until_complete(&mut subscription).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, QueryEvent::ResultSet(s) if s.row_count == 100)));
    assert!(events
        .iter()
        .any(|e| matches!(e, QueryEvent::Message(m) if m.text.contains("truncated"))));

    manager.close_session(session).await.unwrap();
}

/// Scenario: A failing query surfaces as an error message, then completes
#[tokio::test]
async fn test_postgres_query_error_flows_as_message() {
    let Some(runner) = get_test_runner().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let manager = SessionManager::new();
    let session = manager.open_session("pg-test", Arc::new(runner));
    let mut subscription = manager.subscribe_session(session).unwrap();
    manager.mark_sink_ready(session).unwrap();

    manager
        .run_query(
            session,
            RunSpec::new(QueryInput::Text(
                "SELECT * FROM nonexistent_table_for_runner_test".to_string(),
            )),
        )
        .unwrap();

    let events = events_until_complete(&mut subscription).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, QueryEvent::Message(m) if m.is_error)));
    assert!(matches!(events.last(), Some(QueryEvent::Completed { .. })));
    assert!(!manager.is_running(session));

    manager.close_session(session).await.unwrap();
}

/// Scenario: Connecting with a bad host fails with a connection error
#[tokio::test]
async fn test_postgres_connect_failure() {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    }

    let config =
        ConnectionConfig::from_connection_string("postgres://user@nonexistent-host-zz:5432/db")
            .unwrap();
    let settings = RunnerSettings {
        query_timeout: Duration::from_secs(1),
        max_rows: 10,
    };

    let result = PostgresRunner::connect(&config, settings).await;
    assert!(matches!(result, Err(QueryMuxError::Connection(_))));
}
