//! Integration tests for db-querytask.

pub mod cancellation_test;
pub mod query_test;
pub mod sqlite_test;

use db_querytask::config::PipelineConfig;
use db_querytask::db::Row;
use db_querytask::error::SharedError;
use db_querytask::query::{QueryTask, StreamStatus};
use db_querytask::task::TaskListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Flattened view of the events a query task emitted.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Columns(Vec<String>),
    Rows(Vec<Row>),
    Result(Option<u64>),
    Error(String),
    Finished,
}

/// Records every event of a query task.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// All rows received, in order.
    pub fn rows(&self) -> Vec<Row> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Rows(rows) => Some(rows),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn batch_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Rows(_)))
            .count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl TaskListener<StreamStatus, Option<u64>> for Recorder {
    fn finished(&self) {
        self.push(Event::Finished);
    }

    fn status(&self, status: &StreamStatus) {
        self.push(match status {
            StreamStatus::Columns(columns) => {
                Event::Columns(columns.iter().map(|c| c.name.clone()).collect())
            }
            StreamStatus::Rows(rows) => Event::Rows(rows.to_vec()),
        });
    }

    fn result(&self, result: &Option<u64>) {
        self.push(Event::Result(*result));
    }

    fn error(&self, error: &SharedError) {
        self.push(Event::Error(error.to_string()));
    }
}

/// Short intervals so tests run quickly.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_flush_interval(Duration::from_millis(100))
}

/// Attaches a recorder and starts the task.
pub fn start(task: &QueryTask) -> Arc<Recorder> {
    let recorder = Arc::new(Recorder::default());
    task.add_listener(recorder.clone());
    task.start().unwrap();
    recorder
}

/// Waits for the task to finish, failing the test after `secs` seconds.
pub async fn finish_within(task: &QueryTask, secs: u64) {
    tokio::time::timeout(Duration::from_secs(secs), task.wait())
        .await
        .expect("query did not finish in time");
}
