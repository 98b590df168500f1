//! Mock driver for testing.
//!
//! Scripted statements, cursors and connections that reproduce the driver
//! behaviours the pipeline has to cope with: mixed outcome chains, slow
//! executions, cursors that fail halfway, and drivers that refuse to cancel.

use super::{ColumnInfo, Connection, Cursor, Row, Statement, StatementCanceller, Value};
use crate::error::{QueryTaskError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One entry in a scripted outcome chain.
pub enum MockOutcome {
    /// An update count.
    Count(u64),
    /// A row-set read through the given cursor.
    RowSet(MockCursor),
    /// The driver fails while producing this outcome.
    Error(String),
}

enum RowSource {
    Rows(Vec<Row>),
    Counter { limit: Option<usize> },
}

/// A cursor over scripted rows.
pub struct MockCursor {
    columns: Vec<ColumnInfo>,
    source: RowSource,
    position: usize,
    current: Option<Row>,
    row_delay: Duration,
    fail_after: Option<(usize, String)>,
}

impl MockCursor {
    /// Creates a cursor over the given rows.
    pub fn new(columns: &[&str], rows: Vec<Row>) -> Self {
        Self::with_source(columns, RowSource::Rows(rows))
    }

    /// Creates a single-column cursor (`n`) yielding `1..=count`.
    pub fn sequence(count: usize) -> Self {
        Self::with_source(&["n"], RowSource::Counter { limit: Some(count) })
    }

    /// Creates a single-column cursor (`n`) counting up forever.
    pub fn unbounded() -> Self {
        Self::with_source(&["n"], RowSource::Counter { limit: None })
    }

    fn with_source(columns: &[&str], source: RowSource) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|name| ColumnInfo::new(*name, "mock"))
                .collect(),
            source,
            position: 0,
            current: None,
            row_delay: Duration::ZERO,
            fail_after: None,
        }
    }

    /// Sleeps for `delay` before producing every row.
    pub fn with_row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = delay;
        self
    }

    /// Fails with a cursor error once `rows` rows have been produced.
    pub fn failing_after(mut self, rows: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((rows, message.into()));
        self
    }

    fn row_at(&self, position: usize) -> Option<Row> {
        match &self.source {
            RowSource::Rows(rows) => rows.get(position).cloned(),
            RowSource::Counter { limit } => match limit {
                Some(limit) if position >= *limit => None,
                _ => Some(vec![Value::Int(position as i64 + 1)]),
            },
        }
    }
}

#[async_trait]
impl Cursor for MockCursor {
    fn columns(&self) -> Result<Vec<ColumnInfo>> {
        Ok(self.columns.clone())
    }

    async fn advance(&mut self) -> Result<bool> {
        if !self.row_delay.is_zero() {
            tokio::time::sleep(self.row_delay).await;
        }

        if let Some((after, message)) = &self.fail_after {
            if self.position >= *after {
                self.current = None;
                return Err(QueryTaskError::cursor(message.clone()));
            }
        }

        self.current = self.row_at(self.position);
        if self.current.is_some() {
            self.position += 1;
        }
        Ok(self.current.is_some())
    }

    fn current_row(&self) -> Result<Row> {
        self.current
            .clone()
            .ok_or_else(|| QueryTaskError::cursor("cursor is not positioned on a row"))
    }
}

/// Cancel handle of a [`MockStatement`], observable from tests.
pub struct MockCanceller {
    supported: bool,
    attempts: AtomicUsize,
    interrupt: CancellationToken,
}

impl MockCanceller {
    fn new(supported: bool) -> Self {
        Self {
            supported,
            attempts: AtomicUsize::new(0),
            interrupt: CancellationToken::new(),
        }
    }

    /// Number of times a driver-level cancel was requested.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns true if the statement was actually interrupted.
    pub fn was_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }
}

impl StatementCanceller for MockCanceller {
    fn cancel(&self) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.supported {
            return Err(QueryTaskError::cancel_unsupported(
                "mock driver cannot cancel statements",
            ));
        }
        self.interrupt.cancel();
        Ok(())
    }
}

/// A statement that replays a scripted outcome chain.
pub struct MockStatement {
    outcomes: VecDeque<MockOutcome>,
    update_count: Option<u64>,
    row_set: Option<MockCursor>,
    execute_delay: Duration,
    canceller: Arc<MockCanceller>,
    executed: bool,
}

impl MockStatement {
    /// Creates a statement producing `outcomes` in order.
    pub fn new(outcomes: Vec<MockOutcome>) -> Self {
        Self {
            outcomes: outcomes.into(),
            update_count: None,
            row_set: None,
            execute_delay: Duration::ZERO,
            canceller: Arc::new(MockCanceller::new(true)),
            executed: false,
        }
    }

    /// A statement whose only outcome is an update count.
    pub fn count(rows: u64) -> Self {
        Self::new(vec![MockOutcome::Count(rows)])
    }

    /// A statement whose only outcome is the given row-set.
    pub fn rows(cursor: MockCursor) -> Self {
        Self::new(vec![MockOutcome::RowSet(cursor)])
    }

    /// Makes `execute` take `delay` before the first outcome is available.
    ///
    /// A supported driver-level cancel interrupts the wait with an error.
    pub fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = delay;
        self
    }

    /// Makes driver-level cancel report that it is unsupported.
    pub fn with_unsupported_cancel(mut self) -> Self {
        self.canceller = Arc::new(MockCanceller::new(false));
        self
    }

    /// Returns the concrete cancel handle, for inspection in tests.
    pub fn mock_canceller(&self) -> Arc<MockCanceller> {
        Arc::clone(&self.canceller)
    }

    fn check_interrupted(&self) -> Result<()> {
        if self.canceller.was_interrupted() {
            return Err(QueryTaskError::statement("statement cancelled"));
        }
        Ok(())
    }

    fn next_outcome(&mut self) -> Result<bool> {
        self.update_count = None;
        self.row_set = None;

        match self.outcomes.pop_front() {
            None => Ok(false),
            Some(MockOutcome::Count(rows)) => {
                self.update_count = Some(rows);
                Ok(false)
            }
            Some(MockOutcome::RowSet(cursor)) => {
                self.row_set = Some(cursor);
                Ok(true)
            }
            Some(MockOutcome::Error(message)) => Err(QueryTaskError::statement(message)),
        }
    }
}

#[async_trait]
impl Statement for MockStatement {
    async fn execute(&mut self) -> Result<bool> {
        if self.executed {
            return Err(QueryTaskError::statement("statement already executed"));
        }
        self.executed = true;

        if !self.execute_delay.is_zero() {
            let canceller = Arc::clone(&self.canceller);
            tokio::select! {
                _ = tokio::time::sleep(self.execute_delay) => {}
                _ = canceller.interrupt.cancelled() => {}
            }
        }

        self.check_interrupted()?;
        self.next_outcome()
    }

    async fn more_results(&mut self) -> Result<bool> {
        self.check_interrupted()?;
        self.next_outcome()
    }

    fn update_count(&self) -> Option<u64> {
        self.update_count
    }

    fn take_row_set(&mut self) -> Option<Box<dyn Cursor>> {
        self.row_set
            .take()
            .map(|cursor| Box::new(cursor) as Box<dyn Cursor>)
    }

    fn canceller(&self) -> Arc<dyn StatementCanceller> {
        self.canceller.clone()
    }
}

type StatementFactory = Box<dyn Fn() -> MockStatement + Send + Sync>;

/// A connection that prepares scripted statements.
///
/// SQL without a registered script falls back to a single-row result for
/// `SELECT` and an update count of zero for everything else.
pub struct MockConnection {
    scripts: HashMap<String, StatementFactory>,
    prepared: AtomicUsize,
}

impl MockConnection {
    /// Creates a connection with no registered scripts.
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            prepared: AtomicUsize::new(0),
        }
    }

    /// Registers the statement to prepare for `sql`.
    pub fn with_script<F>(mut self, sql: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> MockStatement + Send + Sync + 'static,
    {
        self.scripts.insert(sql.into(), Box::new(factory));
        self
    }

    /// Number of statements prepared so far.
    pub fn prepared_count(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn prepare(&self, sql: &str) -> Result<Box<dyn Statement>> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(QueryTaskError::statement("empty statement"));
        }
        self.prepared.fetch_add(1, Ordering::SeqCst);

        if let Some(factory) = self.scripts.get(sql) {
            return Ok(Box::new(factory()));
        }

        let statement = if sql.to_uppercase().starts_with("SELECT") {
            MockStatement::rows(MockCursor::new(
                &["result"],
                vec![vec![Value::String(format!("Mock result for: {sql}"))]],
            ))
        } else {
            MockStatement::count(0)
        };
        Ok(Box::new(statement))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
