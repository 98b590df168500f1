//! Outcome selection through the public query API.

use super::{fast_config, finish_within, start, Event};
use db_querytask::db::{MockConnection, MockCursor, MockOutcome, MockStatement, Value};
use db_querytask::query::QueryOrchestrator;
use pretty_assertions::assert_eq;

fn connection() -> MockConnection {
    MockConnection::new()
        .with_script("UPDATE users SET active = true WHERE id < 4", || {
            MockStatement::count(3)
        })
        .with_script("DECLARE @x INT; SELECT 1", || {
            MockStatement::new(vec![
                MockOutcome::Count(0),
                MockOutcome::RowSet(MockCursor::new(&[""], vec![vec![Value::Int(1)]])),
            ])
        })
        .with_script("EXEC refresh_all", || {
            MockStatement::new(vec![
                MockOutcome::Count(2),
                MockOutcome::Count(5),
                MockOutcome::Count(1),
            ])
        })
        .with_script("EXEC report", || {
            MockStatement::new(vec![
                MockOutcome::Count(9),
                MockOutcome::RowSet(MockCursor::new(&["first"], vec![vec![Value::Int(1)]])),
                MockOutcome::Count(4),
                MockOutcome::RowSet(MockCursor::new(&["second"], vec![vec![Value::Int(2)]])),
            ])
        })
        .with_script("DELETE FROM missing", || {
            MockStatement::new(vec![MockOutcome::Error(
                "relation \"missing\" does not exist".to_string(),
            )])
        })
}

/// Scenario: a SELECT returning one row
/// Given `SELECT 1`
/// Then one column header, one batch `[[1]]` and finished are emitted
#[tokio::test]
async fn test_select_one() {
    let connection = connection();
    let task = QueryOrchestrator::prepare(&connection, "SELECT 1", fast_config())
        .await
        .unwrap();
    let recorder = start(&task);
    finish_within(&task, 5).await;

    assert_eq!(
        recorder.events(),
        vec![
            Event::Columns(vec!["result".to_string()]),
            Event::Rows(vec![vec![Value::String(
                "Mock result for: SELECT 1".to_string()
            )]]),
            Event::Finished,
        ]
    );
}

/// Scenario: an UPDATE affecting three rows
/// Then the result is 3, followed by finished, with no statuses
#[tokio::test]
async fn test_update_reports_count() {
    let connection = connection();
    let task = QueryOrchestrator::prepare(
        &connection,
        "UPDATE users SET active = true WHERE id < 4",
        fast_config(),
    )
    .await
    .unwrap();
    let recorder = start(&task);
    finish_within(&task, 5).await;

    assert_eq!(recorder.events(), vec![Event::Result(Some(3)), Event::Finished]);
    assert!(task.status().is_none());
}

/// Scenario: a declaration before a SELECT
/// Then the SELECT's row-set is streamed and the declaration's count is skipped
#[tokio::test]
async fn test_declaration_then_select() {
    let connection = connection();
    let task = QueryOrchestrator::prepare(&connection, "DECLARE @x INT; SELECT 1", fast_config())
        .await
        .unwrap();
    let recorder = start(&task);
    finish_within(&task, 5).await;

    assert_eq!(
        recorder.events(),
        vec![
            Event::Columns(vec![String::new()]),
            Event::Rows(vec![vec![Value::Int(1)]]),
            Event::Finished,
        ]
    );
}

#[tokio::test]
async fn test_last_count_wins() {
    let connection = connection();
    let task = QueryOrchestrator::prepare(&connection, "EXEC refresh_all", fast_config())
        .await
        .unwrap();
    let recorder = start(&task);
    finish_within(&task, 5).await;

    assert_eq!(recorder.events(), vec![Event::Result(Some(1)), Event::Finished]);
}

#[tokio::test]
async fn test_first_row_set_wins() {
    let connection = connection();
    let task = QueryOrchestrator::prepare(&connection, "EXEC report", fast_config())
        .await
        .unwrap();
    let recorder = start(&task);
    finish_within(&task, 5).await;

    let events = recorder.events();
    assert_eq!(events[0], Event::Columns(vec!["first".to_string()]));
    assert_eq!(recorder.rows(), vec![vec![Value::Int(1)]]);
    assert!(!events.iter().any(|e| matches!(e, Event::Result(_))));
}

#[tokio::test]
async fn test_statement_error_then_finished() {
    let connection = connection();
    let task = QueryOrchestrator::prepare(&connection, "DELETE FROM missing", fast_config())
        .await
        .unwrap();
    let recorder = start(&task);
    finish_within(&task, 5).await;

    assert_eq!(
        recorder.events(),
        vec![
            Event::Error("Statement error: relation \"missing\" does not exist".to_string()),
            Event::Finished,
        ]
    );
    assert_eq!(task.error().unwrap().category(), "Statement Error");
}

#[tokio::test]
async fn test_every_listener_sees_the_same_events() {
    let connection = connection();
    let task = QueryOrchestrator::prepare(&connection, "EXEC refresh_all", fast_config())
        .await
        .unwrap();
    let second = std::sync::Arc::new(super::Recorder::default());
    task.add_listener(second.clone());
    let first = start(&task);
    finish_within(&task, 5).await;

    assert_eq!(first.events(), second.events());
    assert_eq!(connection.prepared_count(), 1);
}

#[tokio::test]
async fn test_empty_sql_is_rejected_before_start() {
    let connection = connection();
    let result = QueryOrchestrator::prepare(&connection, "", fast_config()).await;
    assert!(result.is_err());
    assert_eq!(connection.prepared_count(), 0);
}
