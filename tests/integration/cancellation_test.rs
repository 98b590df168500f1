//! Cooperative and driver-level cancellation of running queries.

use super::{fast_config, finish_within, start, Event};
use db_querytask::db::{MockCursor, MockOutcome, MockStatement};
use db_querytask::query::QueryOrchestrator;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

#[tokio::test]
async fn test_cancel_before_start_only_finishes() {
    let task = QueryOrchestrator::task(Box::new(MockStatement::count(3)), fast_config());
    task.cancel();
    let recorder = start(&task);
    finish_within(&task, 5).await;

    assert_eq!(recorder.events(), vec![Event::Finished]);
    assert!(task.is_cancelled());
}

#[tokio::test]
async fn test_never_started_emits_nothing() {
    let task = QueryOrchestrator::task(Box::new(MockStatement::count(3)), fast_config());
    let recorder = std::sync::Arc::new(super::Recorder::default());
    task.add_listener(recorder.clone());
    task.cancel();

    sleep(Duration::from_millis(50)).await;
    assert!(recorder.events().is_empty());
    assert!(!task.is_finished());
}

#[tokio::test]
async fn test_long_statement_is_interrupted_promptly() {
    let statement = MockStatement::count(1).with_execute_delay(Duration::from_secs(60));
    let probe = statement.mock_canceller();
    let config = fast_config().with_poll_interval(Duration::from_millis(50));
    let task = QueryOrchestrator::task(Box::new(statement), config);
    let recorder = start(&task);

    sleep(Duration::from_millis(30)).await;
    let cancelled_at = Instant::now();
    task.cancel();
    timeout(Duration::from_secs(1), task.wait())
        .await
        .expect("cancellation was not observed");

    assert!(cancelled_at.elapsed() < Duration::from_millis(500));
    assert!(probe.was_interrupted());
    assert_eq!(recorder.events(), vec![Event::Finished]);
}

/// Scenario: the driver cannot cancel statements
/// Then the interrupt is tried once and the query runs to completion silently
#[tokio::test]
async fn test_unsupported_interrupt_waits_for_completion() {
    let statement = MockStatement::new(vec![MockOutcome::Count(1), MockOutcome::Count(2)])
        .with_execute_delay(Duration::from_millis(300))
        .with_unsupported_cancel();
    let probe = statement.mock_canceller();
    let task = QueryOrchestrator::task(Box::new(statement), fast_config());
    let recorder = start(&task);

    sleep(Duration::from_millis(30)).await;
    task.cancel();
    sleep(Duration::from_millis(100)).await;
    assert!(!task.is_finished());

    finish_within(&task, 5).await;
    assert_eq!(probe.attempts(), 1);
    assert_eq!(recorder.events(), vec![Event::Finished]);
    assert!(!task.has_error());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_stream_stops_batches() {
    let cursor = MockCursor::unbounded().with_row_delay(Duration::from_millis(1));
    let task = QueryOrchestrator::task(Box::new(MockStatement::rows(cursor)), fast_config());
    let recorder = start(&task);

    sleep(Duration::from_millis(350)).await;
    task.cancel();
    let batches_at_cancel = recorder.batch_count();
    finish_within(&task, 5).await;

    let events = recorder.events();
    assert!(recorder.batch_count() <= batches_at_cancel + 1);
    assert_eq!(events.last(), Some(&Event::Finished));
    assert!(!events.iter().any(|e| matches!(e, Event::Error(_))));
    assert!(!task.has_result());
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let statement = MockStatement::count(1).with_execute_delay(Duration::from_secs(60));
    let probe = statement.mock_canceller();
    let task = QueryOrchestrator::task(Box::new(statement), fast_config());
    let recorder = start(&task);

    sleep(Duration::from_millis(20)).await;
    task.cancel();
    task.cancel();
    finish_within(&task, 5).await;
    task.cancel();

    assert_eq!(probe.attempts(), 1);
    assert_eq!(recorder.events(), vec![Event::Finished]);
}
