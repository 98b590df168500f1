//! End-to-end runs against an in-memory SQLite database.

use super::{fast_config, finish_within, start, Event};
use db_querytask::db::{Connection, SqlxConnection, Value};
use db_querytask::query::QueryOrchestrator;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

async fn connect() -> SqlxConnection {
    SqlxConnection::connect("sqlite::memory:").await.unwrap()
}

#[tokio::test]
async fn test_sqlite_select_one() {
    let connection = connect().await;
    let task = QueryOrchestrator::prepare(&connection, "SELECT 1 AS n", fast_config())
        .await
        .unwrap();
    let recorder = start(&task);
    finish_within(&task, 10).await;

    assert_eq!(
        recorder.events(),
        vec![
            Event::Columns(vec!["n".to_string()]),
            Event::Rows(vec![vec![Value::Int(1)]]),
            Event::Finished,
        ]
    );
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_update_count() {
    let connection = connect().await;
    let task = QueryOrchestrator::prepare(
        &connection,
        "CREATE TABLE items (id INTEGER, qty INTEGER); \
         INSERT INTO items VALUES (1, 0), (2, 0), (3, 0); \
         UPDATE items SET qty = qty + 1",
        fast_config(),
    )
    .await
    .unwrap();
    let recorder = start(&task);
    finish_within(&task, 10).await;

    assert_eq!(recorder.events(), vec![Event::Result(Some(3)), Event::Finished]);
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_row_set_after_counts() {
    let connection = connect().await;
    let task = QueryOrchestrator::prepare(
        &connection,
        "CREATE TABLE items (id INTEGER, name TEXT); \
         INSERT INTO items VALUES (1, 'bolt'), (2, 'nut'); \
         SELECT id, name FROM items ORDER BY id",
        fast_config(),
    )
    .await
    .unwrap();
    let recorder = start(&task);
    finish_within(&task, 10).await;

    assert_eq!(
        recorder.events(),
        vec![
            Event::Columns(vec!["id".to_string(), "name".to_string()]),
            Event::Rows(vec![
                vec![Value::Int(1), Value::String("bolt".to_string())],
                vec![Value::Int(2), Value::String("nut".to_string())],
            ]),
            Event::Finished,
        ]
    );
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_syntax_error() {
    let connection = connect().await;
    let task = QueryOrchestrator::prepare(&connection, "SELEC 1", fast_config())
        .await
        .unwrap();
    let recorder = start(&task);
    finish_within(&task, 10).await;

    let events = recorder.events();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], Event::Error(message) if message.starts_with("Statement error")));
    assert_eq!(events[1], Event::Finished);
    connection.close().await.unwrap();
}

/// Scenario: cancelling a long-running aggregate
/// Given a recursive count that runs for many seconds
/// When the query is cancelled while the statement executes
/// Then the driver interrupts it and only finished arrives, within about one poll interval
#[tokio::test]
async fn test_sqlite_long_query_is_interrupted() {
    let connection = connect().await;
    let config = fast_config().with_poll_interval(Duration::from_millis(50));
    let task = QueryOrchestrator::prepare(
        &connection,
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 300000000) \
         SELECT count(*) FROM c",
        config,
    )
    .await
    .unwrap();
    let recorder = start(&task);

    sleep(Duration::from_millis(200)).await;
    assert!(!task.is_finished());

    let cancelled_at = Instant::now();
    task.cancel();
    timeout(Duration::from_secs(2), task.wait())
        .await
        .expect("long query was not interrupted");

    assert!(cancelled_at.elapsed() < Duration::from_millis(500));
    assert_eq!(recorder.events(), vec![Event::Finished]);
    assert!(!task.has_error());
}

#[tokio::test]
async fn test_sqlite_connect_failure() {
    let result = SqlxConnection::connect("sqlite:/nonexistent/dir/db.sqlite").await;
    let err = result.err().expect("connect should fail");
    assert_eq!(err.category(), "Connection Error");
}
